//! Semantic action targets and their locator strategies.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// ARIA roles the harness locates by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AriaRole {
    Button,
    Checkbox,
    Combobox,
    Heading,
    Link,
    Row,
    Textbox,
}

impl AriaRole {
    pub fn as_str(self) -> &'static str {
        match self {
            AriaRole::Button => "button",
            AriaRole::Checkbox => "checkbox",
            AriaRole::Combobox => "combobox",
            AriaRole::Heading => "heading",
            AriaRole::Link => "link",
            AriaRole::Row => "row",
            AriaRole::Textbox => "textbox",
        }
    }
}

/// Text comparison applied to names, visible text and attribute values.
///
/// `Contains` is case-insensitive. Regex sources use the shared subset of
/// Rust and ECMAScript syntax, with a leading `(?i)` for case folding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "lowercase")]
pub enum TextMatcher {
    Exact(String),
    Contains(String),
    Regex(String),
}

impl TextMatcher {
    pub fn exact(value: impl Into<String>) -> Self {
        TextMatcher::Exact(value.into())
    }

    pub fn contains(value: impl Into<String>) -> Self {
        TextMatcher::Contains(value.into())
    }

    pub fn regex(pattern: impl Into<String>) -> Self {
        TextMatcher::Regex(pattern.into())
    }

    /// Case-insensitive whole-text match against any of `variants`.
    pub fn any_of(variants: &[&str]) -> Self {
        let alternation = variants
            .iter()
            .map(|variant| regex::escape(variant.trim()))
            .collect::<Vec<_>>()
            .join("|");
        TextMatcher::Regex(format!(r"(?i)^\s*(?:{alternation})\s*$"))
    }

    /// Evaluate the matcher against normalised text.
    ///
    /// An invalid regex never matches.
    pub fn matches(&self, text: &str) -> bool {
        let normalised = normalise_whitespace(text);
        match self {
            TextMatcher::Exact(value) => normalised == normalise_whitespace(value),
            TextMatcher::Contains(value) => normalised
                .to_lowercase()
                .contains(&normalise_whitespace(value).to_lowercase()),
            TextMatcher::Regex(pattern) => regex::Regex::new(pattern)
                .map(|re| re.is_match(&normalised))
                .unwrap_or(false),
        }
    }
}

pub(crate) fn normalise_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// One way of finding an element.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum LocatorStrategy {
    /// Role plus accessible name.
    Role { role: AriaRole, name: TextMatcher },
    /// Plain CSS selector. Comma-separated lists are allowed.
    Css { selector: String },
    /// Container matching `container` that has a `descendant` whose text matches.
    Within {
        container: String,
        descendant: String,
        text: TextMatcher,
    },
    /// Innermost element whose visible text matches, lifted to its nearest
    /// interactive ancestor.
    Text { matcher: TextMatcher },
    /// Element whose attribute `name` matches `pattern`.
    Attribute { name: String, pattern: TextMatcher },
}

/// Precedence classes, highest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    Role,
    Structural,
    Text,
    Attribute,
}

impl LocatorStrategy {
    pub fn kind(&self) -> StrategyKind {
        match self {
            LocatorStrategy::Role { .. } => StrategyKind::Role,
            LocatorStrategy::Css { .. } | LocatorStrategy::Within { .. } => {
                StrategyKind::Structural
            }
            LocatorStrategy::Text { .. } => StrategyKind::Text,
            LocatorStrategy::Attribute { .. } => StrategyKind::Attribute,
        }
    }

    pub fn css(selector: impl Into<String>) -> Self {
        LocatorStrategy::Css {
            selector: selector.into(),
        }
    }
}

/// A strategy with its own lookup window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetStrategy {
    pub strategy: LocatorStrategy,
    pub timeout: Duration,
}

pub const DEFAULT_STRATEGY_TIMEOUT: Duration = Duration::from_millis(800);
pub const DEFAULT_TARGET_BUDGET: Duration = Duration::from_secs(5);

/// Semantic description of something to interact with, plus the ordered
/// strategies that can find it. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionTarget {
    description: String,
    strategies: Vec<TargetStrategy>,
    budget: Duration,
}

impl ActionTarget {
    pub fn builder(description: impl Into<String>) -> ActionTargetBuilder {
        ActionTargetBuilder {
            description: description.into(),
            strategies: Vec::new(),
            budget: DEFAULT_TARGET_BUDGET,
            strategy_timeout: DEFAULT_STRATEGY_TIMEOUT,
        }
    }

    /// Shortcut for a target found by CSS only.
    pub fn css(description: impl Into<String>, selector: impl Into<String>) -> ActionTarget {
        ActionTarget::builder(description).css(selector).build()
    }

    /// Buttons captioned with any of `captions`.
    ///
    /// Covers real buttons, `role=button`, and the app's clickable
    /// `div[tabindex="0"]` cards whose caption sits in an `h1`.
    pub fn button(captions: &[&str]) -> ActionTargetBuilder {
        let description = format!("button {}", captions.join(" / "));
        let mut builder =
            ActionTarget::builder(description).role(AriaRole::Button, TextMatcher::any_of(captions));
        for caption in captions {
            builder = builder
                .within("button", "h1", TextMatcher::contains(*caption))
                .within(r#"div[tabindex="0"]"#, "h1", TextMatcher::contains(*caption));
        }
        builder.text(TextMatcher::any_of(captions))
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn strategies(&self) -> &[TargetStrategy] {
        &self.strategies
    }

    pub fn budget(&self) -> Duration {
        self.budget
    }
}

/// Builder for [`ActionTarget`]; strategies are stably sorted by precedence.
#[derive(Debug, Clone)]
pub struct ActionTargetBuilder {
    description: String,
    strategies: Vec<TargetStrategy>,
    budget: Duration,
    strategy_timeout: Duration,
}

impl ActionTargetBuilder {
    /// Timeout applied to strategies added after this call.
    pub fn strategy_timeout(mut self, timeout: Duration) -> Self {
        self.strategy_timeout = timeout;
        self
    }

    pub fn budget(mut self, budget: Duration) -> Self {
        self.budget = budget;
        self
    }

    pub fn strategy(mut self, strategy: LocatorStrategy) -> Self {
        self.strategies.push(TargetStrategy {
            strategy,
            timeout: self.strategy_timeout,
        });
        self
    }

    pub fn role(self, role: AriaRole, name: TextMatcher) -> Self {
        self.strategy(LocatorStrategy::Role { role, name })
    }

    pub fn css(self, selector: impl Into<String>) -> Self {
        self.strategy(LocatorStrategy::css(selector))
    }

    pub fn within(
        self,
        container: impl Into<String>,
        descendant: impl Into<String>,
        text: TextMatcher,
    ) -> Self {
        self.strategy(LocatorStrategy::Within {
            container: container.into(),
            descendant: descendant.into(),
            text,
        })
    }

    pub fn text(self, matcher: TextMatcher) -> Self {
        self.strategy(LocatorStrategy::Text { matcher })
    }

    pub fn attribute(self, name: impl Into<String>, pattern: TextMatcher) -> Self {
        self.strategy(LocatorStrategy::Attribute {
            name: name.into(),
            pattern,
        })
    }

    pub fn build(mut self) -> ActionTarget {
        self.strategies.sort_by_key(|entry| entry.strategy.kind());
        ActionTarget {
            description: self.description,
            strategies: self.strategies,
            budget: self.budget,
        }
    }
}
