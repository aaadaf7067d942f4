//! In-memory page double for action-layer tests.
//!
//! Elements declare which selectors they answer to, what text they carry and
//! how their value reacts to each write channel, so tests can model
//! components that ignore some input paths, auto-format values, or only
//! become clickable after a few polls.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value as JsonValue;

use super::{ClickMethod, ElementHandle, ElementState, PageDriver, ValueDispatch};
use crate::actions::target::LocatorStrategy;
use crate::error::DriverError;

pub(crate) type Reaction = Arc<dyn Fn(&mut FakeDom) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WriteChannel {
    Keystrokes,
    Fill,
    SelectAllRetype,
    NativeEvents,
}

const ALL_CHANNELS: [WriteChannel; 4] = [
    WriteChannel::Keystrokes,
    WriteChannel::Fill,
    WriteChannel::SelectAllRetype,
    WriteChannel::NativeEvents,
];

#[derive(Clone)]
pub(crate) struct InputModel {
    accepts: Vec<WriteChannel>,
    formatter: Option<fn(&str) -> String>,
    admits: Option<fn(&str) -> bool>,
    max_length: Option<usize>,
    selected: bool,
}

impl InputModel {
    pub fn plain() -> Self {
        Self::accepting(&ALL_CHANNELS)
    }

    pub fn accepting(channels: &[WriteChannel]) -> Self {
        InputModel {
            accepts: channels.to_vec(),
            formatter: None,
            admits: None,
            max_length: None,
            selected: false,
        }
    }

    pub fn formatted(mut self, formatter: fn(&str) -> String) -> Self {
        self.formatter = Some(formatter);
        self
    }

    /// Drop any write whose raw value fails `admits`.
    pub fn admitting(mut self, admits: fn(&str) -> bool) -> Self {
        self.admits = Some(admits);
        self
    }

    pub fn max_length(mut self, max: usize) -> Self {
        self.max_length = Some(max);
        self
    }

    fn accepts(&self, channel: WriteChannel) -> bool {
        self.accepts.contains(&channel)
    }

    fn apply(&self, raw: &str) -> Option<String> {
        if self.admits.is_some_and(|admits| !admits(raw)) {
            return None;
        }
        let clamped: String = match self.max_length {
            Some(max) => raw.chars().take(max).collect(),
            None => raw.to_string(),
        };
        Some(match self.formatter {
            Some(format) => format(&clamped),
            None => clamped,
        })
    }
}

#[derive(Clone)]
pub(crate) struct FakeElement {
    pub key: String,
    pub parent: Option<String>,
    pub role: Option<String>,
    pub name: Option<String>,
    pub text: String,
    pub css: Vec<String>,
    pub contains: Vec<(String, String)>,
    pub attrs: HashMap<String, String>,
    pub value: String,
    pub input: Option<InputModel>,
    pub states: Vec<ElementState>,
    pub checked: bool,
    pub options: Vec<(String, String)>,
    pub files: Vec<PathBuf>,
    pub failing_clicks: Vec<ClickMethod>,
}

impl FakeElement {
    pub fn new(key: &str) -> Self {
        FakeElement {
            key: key.to_string(),
            parent: None,
            role: None,
            name: None,
            text: String::new(),
            css: Vec::new(),
            contains: Vec::new(),
            attrs: HashMap::new(),
            value: String::new(),
            input: None,
            states: vec![ElementState::default()],
            checked: false,
            options: Vec::new(),
            files: Vec::new(),
            failing_clicks: Vec::new(),
        }
    }

    pub fn button(key: &str, caption: &str) -> Self {
        FakeElement::new(key)
            .role("button", caption)
            .text(caption)
            .css("button")
    }

    pub fn input(key: &str) -> Self {
        FakeElement::new(key)
            .css("input")
            .input_model(InputModel::plain())
    }

    pub fn heading(key: &str, text: &str) -> Self {
        FakeElement::new(key).role("heading", text).text(text).css("h1")
    }

    /// A keypad key: `div[tabindex="0"]` wrapping an `h3` digit.
    pub fn keypad_key(key: &str, digit: char) -> Self {
        FakeElement::new(key)
            .css(r#"div[tabindex="0"]"#)
            .css(r#"div[tabindex="0"]:has(h3)"#)
            .contains("h3", &digit.to_string())
            .text(&digit.to_string())
    }

    pub fn role(mut self, role: &str, name: &str) -> Self {
        self.role = Some(role.to_string());
        self.name = Some(name.to_string());
        self
    }

    pub fn text(mut self, text: &str) -> Self {
        self.text = text.to_string();
        self
    }

    pub fn css(mut self, selector: &str) -> Self {
        self.css.push(selector.to_string());
        self
    }

    pub fn contains(mut self, descendant: &str, text: &str) -> Self {
        self.contains.push((descendant.to_string(), text.to_string()));
        self
    }

    pub fn attr(mut self, name: &str, value: &str) -> Self {
        self.attrs.insert(name.to_string(), value.to_string());
        self
    }

    pub fn parent(mut self, key: &str) -> Self {
        self.parent = Some(key.to_string());
        self
    }

    pub fn value(mut self, value: &str) -> Self {
        self.value = value.to_string();
        self
    }

    pub fn input_model(mut self, model: InputModel) -> Self {
        self.input = Some(model);
        self
    }

    pub fn state(mut self, state: ElementState) -> Self {
        self.states = vec![state];
        self
    }

    /// States returned by successive reads; the last one sticks.
    pub fn state_sequence(mut self, states: Vec<ElementState>) -> Self {
        if !states.is_empty() {
            self.states = states;
        }
        self
    }

    pub fn hidden(self) -> Self {
        self.state(ElementState {
            visible: false,
            width: 0.0,
            height: 0.0,
            ..ElementState::default()
        })
    }

    pub fn option(mut self, value: &str, label: &str) -> Self {
        self.options.push((value.to_string(), label.to_string()));
        self
    }

    pub fn failing_click(mut self, method: ClickMethod) -> Self {
        self.failing_clicks.push(method);
        self
    }

    fn current_state(&self) -> ElementState {
        self.states.first().copied().unwrap_or_default()
    }

    fn answers_css(&self, selector: &str) -> bool {
        selector
            .split(',')
            .map(str::trim)
            .any(|part| self.css.iter().any(|own| own == part))
    }

    fn is_kind(&self, kind: &str) -> bool {
        self.attrs.get("type").map(String::as_str) == Some(kind)
    }
}

#[derive(Default)]
pub(crate) struct FakeDom {
    pub elements: Vec<FakeElement>,
    pub url: String,
    pub events: Vec<String>,
    reactions: HashMap<String, Reaction>,
    routes: HashMap<String, Reaction>,
    on_reload: Option<Reaction>,
}

impl FakeDom {
    pub fn element(&self, key: &str) -> Option<&FakeElement> {
        self.elements.iter().find(|el| el.key == key)
    }

    pub fn element_mut(&mut self, key: &str) -> Option<&mut FakeElement> {
        self.elements.iter_mut().find(|el| el.key == key)
    }

    pub fn push(&mut self, element: FakeElement) {
        self.elements.push(element);
    }

    pub fn remove(&mut self, key: &str) {
        self.elements.retain(|el| el.key != key);
    }

    pub fn replace_screen(&mut self, elements: Vec<FakeElement>) {
        self.elements = elements;
    }

    pub fn value_of(&self, key: &str) -> String {
        self.element(key)
            .map(|el| el.value.clone())
            .unwrap_or_default()
    }

    pub fn on_click(&mut self, key: &str, reaction: Reaction) {
        self.reactions.insert(key.to_string(), reaction);
    }

    fn is_descendant(&self, key: &str, ancestor: &str) -> bool {
        let mut cursor = self.element(key).and_then(|el| el.parent.clone());
        while let Some(parent) = cursor {
            if parent == ancestor {
                return true;
            }
            cursor = self.element(&parent).and_then(|el| el.parent.clone());
        }
        false
    }

    fn matches(&self, el: &FakeElement, strategy: &LocatorStrategy) -> bool {
        match strategy {
            LocatorStrategy::Role { role, name } => {
                el.role.as_deref() == Some(role.as_str())
                    && name.matches(el.name.as_deref().unwrap_or(&el.text))
            }
            LocatorStrategy::Css { selector } => el.answers_css(selector),
            LocatorStrategy::Within {
                container,
                descendant,
                text,
            } => {
                el.answers_css(container)
                    && el.contains.iter().any(|(css, content)| {
                        descendant.split(',').map(str::trim).any(|part| part == css)
                            && text.matches(content)
                    })
            }
            LocatorStrategy::Text { matcher } => !el.text.is_empty() && matcher.matches(&el.text),
            LocatorStrategy::Attribute { name, pattern } => el
                .attrs
                .get(name)
                .map(|value| pattern.matches(value))
                .unwrap_or(false),
        }
    }

    fn ordered(&self, keys: impl Iterator<Item = String>) -> Vec<ElementHandle> {
        let mut keys: Vec<String> = keys.collect();
        keys.sort_by_key(|key| {
            !self
                .element(key)
                .map(|el| el.current_state().visible)
                .unwrap_or(false)
        });
        keys.into_iter().map(ElementHandle::new).collect()
    }

    fn lookup(&self, handle: &ElementHandle) -> Result<&FakeElement, DriverError> {
        self.element(handle.token())
            .ok_or_else(|| DriverError::Detached(handle.to_string()))
    }

    fn lookup_mut(&mut self, handle: &ElementHandle) -> Result<&mut FakeElement, DriverError> {
        self.element_mut(handle.token())
            .ok_or_else(|| DriverError::Detached(handle.to_string()))
    }

    fn run_reaction(&mut self, key: &str) {
        if let Some(reaction) = self.reactions.get(key).cloned() {
            reaction(self);
        }
    }
}

pub(crate) struct FakePage {
    dom: Mutex<FakeDom>,
}

impl FakePage {
    pub fn new(elements: Vec<FakeElement>) -> Self {
        FakePage {
            dom: Mutex::new(FakeDom {
                elements,
                url: "about:blank".to_string(),
                ..FakeDom::default()
            }),
        }
    }

    fn dom(&self) -> MutexGuard<'_, FakeDom> {
        self.dom.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn with<R>(&self, f: impl FnOnce(&mut FakeDom) -> R) -> R {
        f(&mut *self.dom())
    }

    pub fn on_click(&self, key: &str, reaction: Reaction) {
        self.dom().on_click(key, reaction);
    }

    pub fn on_files(&self, key: &str, reaction: Reaction) {
        self.dom().on_click(&format!("{key}#files"), reaction);
    }

    pub fn on_goto(&self, url: &str, reaction: Reaction) {
        self.dom().routes.insert(url.to_string(), reaction);
    }

    pub fn on_reload(&self, reaction: Reaction) {
        self.dom().on_reload = Some(reaction);
    }

    pub fn value(&self, key: &str) -> String {
        self.dom().value_of(key)
    }

    pub fn events(&self) -> Vec<String> {
        self.dom().events.clone()
    }

    pub fn count_events(&self, prefix: &str) -> usize {
        self.dom()
            .events
            .iter()
            .filter(|event| event.starts_with(prefix))
            .count()
    }
}

/// Reaction that appends `digit` to the value of `input_key`.
pub(crate) fn append_digit(input_key: &str, digit: char) -> Reaction {
    let input_key = input_key.to_string();
    Arc::new(move |dom: &mut FakeDom| {
        if let Some(el) = dom.element_mut(&input_key) {
            el.value.push(digit);
        }
    })
}

/// A ten-key keypad whose keys append to the hidden input `input_key`.
pub(crate) fn keypad(page: &FakePage, input_key: &str) {
    for digit in '0'..='9' {
        let key = format!("key-{digit}");
        page.with(|dom| dom.push(FakeElement::keypad_key(&key, digit)));
        page.on_click(&key, append_digit(input_key, digit));
    }
}

#[async_trait]
impl PageDriver for FakePage {
    async fn query(&self, strategy: &LocatorStrategy) -> Result<Vec<ElementHandle>, DriverError> {
        let dom = self.dom();
        let keys = dom
            .elements
            .iter()
            .filter(|el| dom.matches(el, strategy))
            .map(|el| el.key.clone())
            .collect::<Vec<_>>();
        Ok(dom.ordered(keys.into_iter()))
    }

    async fn query_within(
        &self,
        scope: &ElementHandle,
        strategy: &LocatorStrategy,
    ) -> Result<Vec<ElementHandle>, DriverError> {
        let dom = self.dom();
        dom.lookup(scope)?;
        let keys = dom
            .elements
            .iter()
            .filter(|el| dom.is_descendant(&el.key, scope.token()) && dom.matches(el, strategy))
            .map(|el| el.key.clone())
            .collect::<Vec<_>>();
        Ok(dom.ordered(keys.into_iter()))
    }

    async fn query_following(
        &self,
        anchor: &ElementHandle,
        css: &str,
    ) -> Result<Vec<ElementHandle>, DriverError> {
        let dom = self.dom();
        let position = dom
            .elements
            .iter()
            .position(|el| el.key == anchor.token())
            .ok_or_else(|| DriverError::Detached(anchor.to_string()))?;
        Ok(dom.elements[position + 1..]
            .iter()
            .filter(|el| el.answers_css(css))
            .map(|el| ElementHandle::new(el.key.clone()))
            .collect())
    }

    async fn closest(
        &self,
        element: &ElementHandle,
        css: &str,
    ) -> Result<Option<ElementHandle>, DriverError> {
        let dom = self.dom();
        let mut cursor = Some(dom.lookup(element)?);
        while let Some(el) = cursor {
            if el.answers_css(css) {
                return Ok(Some(ElementHandle::new(el.key.clone())));
            }
            cursor = el.parent.as_deref().and_then(|parent| dom.element(parent));
        }
        Ok(None)
    }

    async fn element_state(&self, element: &ElementHandle) -> Result<ElementState, DriverError> {
        let mut dom = self.dom();
        let el = dom.lookup_mut(element)?;
        let state = el.current_state();
        if el.states.len() > 1 {
            el.states.remove(0);
        }
        Ok(state)
    }

    async fn click(&self, element: &ElementHandle, method: ClickMethod) -> Result<(), DriverError> {
        let mut dom = self.dom();
        let el = dom.lookup_mut(element)?;
        if el.failing_clicks.contains(&method) {
            return Err(DriverError::Command(format!(
                "click {method:?} intercepted on {element}"
            )));
        }
        let state = el.current_state();
        if method == ClickMethod::Pointer
            && !(state.visible && state.pointer_events && !state.disabled)
        {
            return Err(DriverError::Command(format!("{element} is not actionable")));
        }
        if el.is_kind("checkbox") {
            el.checked = !el.checked;
        }
        dom.events.push(format!("click:{element}:{method:?}"));
        dom.run_reaction(element.token());
        Ok(())
    }

    async fn focus(&self, element: &ElementHandle) -> Result<(), DriverError> {
        let mut dom = self.dom();
        dom.lookup(element)?;
        dom.events.push(format!("focus:{element}"));
        Ok(())
    }

    async fn blur(&self, element: &ElementHandle) -> Result<(), DriverError> {
        let mut dom = self.dom();
        dom.lookup(element)?;
        dom.events.push(format!("blur:{element}"));
        Ok(())
    }

    async fn input_value(&self, element: &ElementHandle) -> Result<String, DriverError> {
        Ok(self.dom().lookup(element)?.value.clone())
    }

    async fn fill(&self, element: &ElementHandle, value: &str) -> Result<(), DriverError> {
        let mut dom = self.dom();
        let el = dom.lookup_mut(element)?;
        if let Some(model) = el.input.as_ref().filter(|m| m.accepts(WriteChannel::Fill)) {
            if let Some(next) = model.apply(value) {
                el.value = next;
            }
        }
        dom.events.push(format!("fill:{element}"));
        Ok(())
    }

    async fn type_text(
        &self,
        element: &ElementHandle,
        text: &str,
        delay: Duration,
    ) -> Result<(), DriverError> {
        {
            let mut dom = self.dom();
            let el = dom.lookup_mut(element)?;
            if let Some(model) = el.input.as_mut() {
                if model.selected {
                    model.selected = false;
                    if model.accepts(WriteChannel::SelectAllRetype) {
                        if let Some(next) = model.apply(text) {
                            el.value = next;
                        }
                    }
                } else if model.accepts(WriteChannel::Keystrokes) {
                    let next = format!("{}{}", el.value, text);
                    if let Some(next) = model.apply(&next) {
                        el.value = next;
                    }
                }
            }
            dom.events.push(format!("type:{element}"));
        }
        let keys = u32::try_from(text.chars().count()).unwrap_or(u32::MAX);
        tokio::time::sleep(delay * keys).await;
        Ok(())
    }

    async fn select_all(&self, element: &ElementHandle) -> Result<(), DriverError> {
        let mut dom = self.dom();
        let el = dom.lookup_mut(element)?;
        if let Some(model) = el.input.as_mut() {
            model.selected = true;
        }
        dom.events.push(format!("select_all:{element}"));
        Ok(())
    }

    async fn dispatch_value(
        &self,
        element: &ElementHandle,
        value: &str,
        dispatch: ValueDispatch,
    ) -> Result<(), DriverError> {
        let mut dom = self.dom();
        let el = dom.lookup_mut(element)?;
        if let Some(model) = el
            .input
            .as_ref()
            .filter(|m| m.accepts(WriteChannel::NativeEvents))
        {
            if let Some(next) = model.apply(value) {
                el.value = next;
            }
        }
        dom.events.push(format!("dispatch:{element}:{dispatch:?}"));
        Ok(())
    }

    async fn set_input_files(
        &self,
        element: &ElementHandle,
        files: &[PathBuf],
    ) -> Result<(), DriverError> {
        let mut dom = self.dom();
        let el = dom.lookup_mut(element)?;
        if !el.is_kind("file") {
            return Err(DriverError::Command(format!("{element} is not a file input")));
        }
        el.files = files.to_vec();
        dom.events.push(format!("files:{element}"));
        dom.run_reaction(&format!("{element}#files"));
        Ok(())
    }

    async fn is_checked(&self, element: &ElementHandle) -> Result<bool, DriverError> {
        Ok(self.dom().lookup(element)?.checked)
    }

    async fn select_option(
        &self,
        element: &ElementHandle,
        option: &str,
    ) -> Result<bool, DriverError> {
        let mut dom = self.dom();
        let el = dom.lookup_mut(element)?;
        let chosen = el
            .options
            .iter()
            .find(|(value, label)| value == option || label == option)
            .map(|(value, _)| value.clone());
        match chosen {
            Some(value) => {
                el.value = value;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn attribute(
        &self,
        element: &ElementHandle,
        name: &str,
    ) -> Result<Option<String>, DriverError> {
        Ok(self.dom().lookup(element)?.attrs.get(name).cloned())
    }

    async fn inner_text(&self, element: &ElementHandle) -> Result<String, DriverError> {
        Ok(self.dom().lookup(element)?.text.clone())
    }

    async fn body_text(&self) -> Result<String, DriverError> {
        let dom = self.dom();
        Ok(dom
            .elements
            .iter()
            .filter(|el| el.current_state().visible && !el.text.is_empty())
            .map(|el| el.text.as_str())
            .collect::<Vec<_>>()
            .join("\n"))
    }

    async fn goto(&self, url: &str) -> Result<(), DriverError> {
        let mut dom = self.dom();
        dom.url = url.to_string();
        dom.events.push(format!("goto:{url}"));
        if let Some(route) = dom.routes.get(url).cloned() {
            route(&mut *dom);
        }
        Ok(())
    }

    async fn reload(&self) -> Result<(), DriverError> {
        let mut dom = self.dom();
        dom.events.push("reload".to_string());
        if let Some(reaction) = dom.on_reload.clone() {
            reaction(&mut *dom);
        }
        Ok(())
    }

    async fn current_url(&self) -> Result<String, DriverError> {
        Ok(self.dom().url.clone())
    }

    async fn evaluate(&self, _script: &str) -> Result<JsonValue, DriverError> {
        self.dom().events.push("evaluate".to_string());
        Ok(JsonValue::Null)
    }

    async fn grant_media_permissions(&self) -> Result<(), DriverError> {
        self.dom().events.push("grant_media".to_string());
        Ok(())
    }
}
