//! Compiled prompt and pager patterns for one device.

use std::borrow::Cow;

use fwconsole_core::{DeviceKind, DeviceProfile};
use regex::Regex;

/// Regexes compiled once per session from a [`DeviceProfile`].
#[derive(Debug, Clone)]
pub struct DevicePatterns {
    kind: DeviceKind,
    prompts: Vec<Regex>,
    pagers: Vec<Regex>,
    /// Each pager pattern plus the padding devices print after it.
    pager_scrub: Vec<Regex>,
    continuation_key: String,
}

impl DevicePatterns {
    /// Compile every pattern in `profile`.
    ///
    /// # Errors
    /// Returns the first pattern that fails to compile.
    pub fn compile(profile: &DeviceProfile) -> Result<Self, regex::Error> {
        let prompts = profile
            .prompt_patterns
            .iter()
            .map(|p| Regex::new(p))
            .collect::<Result<Vec<_>, _>>()?;
        let pagers = profile
            .pager_patterns
            .iter()
            .map(|p| Regex::new(p))
            .collect::<Result<Vec<_>, _>>()?;
        let pager_scrub = profile
            .pager_patterns
            .iter()
            .map(|p| Regex::new(&format!("(?:{p})[ \\t]*")))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            kind: profile.kind,
            prompts,
            pagers,
            pager_scrub,
            continuation_key: profile.continuation_key.clone(),
        })
    }

    #[must_use]
    pub const fn kind(&self) -> DeviceKind {
        self.kind
    }

    #[must_use]
    pub fn continuation_key(&self) -> &[u8] {
        self.continuation_key.as_bytes()
    }

    /// Whether `line` (already trimmed) looks like a shell prompt.
    #[must_use]
    pub fn is_prompt(&self, line: &str) -> bool {
        !line.is_empty() && self.prompts.iter().any(|re| re.is_match(line))
    }

    /// Whether `text` contains a pager marker.
    #[must_use]
    pub fn has_pager(&self, text: &str) -> bool {
        self.pagers.iter().any(|re| re.is_match(text))
    }

    /// Remove pager markers and their trailing padding.
    #[must_use]
    pub fn strip_pagers<'a>(&self, text: &'a str) -> Cow<'a, str> {
        let mut out = Cow::Borrowed(text);
        for re in &self.pager_scrub {
            if re.is_match(&out) {
                out = Cow::Owned(re.replace_all(&out, "").into_owned());
            }
        }
        out
    }
}
