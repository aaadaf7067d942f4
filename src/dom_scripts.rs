//! Page-context helper scripts.
//!
//! The scripts live in `scripts/` as real `.js` files and are bundled as
//! strings at compile time.

/// Element query and manipulation helpers, installed as `window.__harness`.
pub const HARNESS_DOM_SCRIPT: &str = include_str!(concat!(
    env!("CARGO_MANIFEST_DIR"),
    "/scripts/harness_dom.js"
));

/// Wraps `getUserMedia` so a failing camera yields a grey canvas stream.
pub const CAMERA_FALLBACK_SCRIPT: &str = include_str!(concat!(
    env!("CARGO_MANIFEST_DIR"),
    "/scripts/camera_fallback.js"
));

/// Expression that installs the helpers when missing, then evaluates `call`
/// against `window.__harness`.
pub fn helper_call(call: &str) -> String {
    format!("(() => {{ {HARNESS_DOM_SCRIPT}\n return window.__harness.{call}; }})()")
}
