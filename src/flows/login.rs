//! Returning-user login: phone, OTP, then the existing PIN.

use super::pin::PinEntry;
use super::signup::verify_phone;
use super::{FlowContext, FlowError, FlowRecorder, Step};
use crate::actions::CodeIntent;
use crate::driver::PageDriver;

/// Log `phone` back in. Lands on the home screen when the PIN is accepted.
///
/// PIN entry is optional: the keypad may advance on the last digit before
/// anything can be read back, so the caller's home-screen assertion decides.
/// A PIN creation screen here means the account was never finished; that
/// aborts the flow instead of setting a new PIN.
pub async fn run_login(
    ctx: &FlowContext<'_>,
    page: &dyn PageDriver,
    recorder: &mut FlowRecorder,
    phone: &str,
    pin: &PinEntry,
) -> Result<(), FlowError> {
    recorder
        .run(Step::required("open app"), async {
            page.goto(&ctx.config.app_url).await?;
            Ok(())
        })
        .await?;
    verify_phone(ctx, page, recorder, phone).await?;
    recorder
        .run(Step::optional("enter PIN"), async {
            pin.submit(page, CodeIntent::EnterPin, &ctx.config.default_pin)
                .await?;
            Ok(())
        })
        .await?;
    recorder
        .run(Step::optional("log in"), async {
            pin.follow_up(page, CodeIntent::EnterPin).await?;
            Ok(())
        })
        .await?;
    Ok(())
}
