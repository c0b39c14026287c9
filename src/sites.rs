//! Human-readable labels for monitoring sites.

use std::collections::BTreeMap;

const SANCTUARIES: [(&str, &str); 8] = [
    ("ci", "Channel Islands"),
    ("fk", "Florida Keys"),
    ("gr", "Gray's Reef"),
    ("hi", "Hawaiian Islands"),
    ("mb", "Monterey Bay"),
    ("oc", "Olympic Coast"),
    ("pm", "Papahānaumokuākea"),
    ("sb", "Stellwagen Bank"),
];

const KNOWN_CODES: [&str; 30] = [
    "ci01", "ci02", "ci03", "ci04", "ci05", "fk01", "fk02", "fk03", "fk04", "gr01", "gr02", "gr03",
    "hi01", "hi03", "hi04", "hi05", "hi06", "mb01", "mb02", "mb03", "oc01", "oc02", "oc03", "oc04",
    "pm01", "pm02", "pm05", "sb01", "sb02", "sb03",
];

/// Site codes and sanctuary names, owned by whoever presents them.
#[derive(Debug, Clone)]
pub struct SiteDirectory {
    sanctuaries: BTreeMap<String, String>,
    codes: Vec<String>,
}

impl Default for SiteDirectory {
    fn default() -> Self {
        Self::new(KNOWN_CODES.iter().map(|c| c.to_string()))
    }
}

impl SiteDirectory {
    /// Directory over `codes` with the built-in sanctuary names.
    pub fn new(codes: impl IntoIterator<Item = String>) -> Self {
        let mut codes: Vec<String> = codes.into_iter().map(|c| c.trim().to_lowercase()).collect();
        codes.sort();
        codes.dedup();
        Self {
            sanctuaries: SANCTUARIES
                .iter()
                .map(|(p, n)| (p.to_string(), n.to_string()))
                .collect(),
            codes,
        }
    }

    pub fn codes(&self) -> &[String] {
        &self.codes
    }

    pub fn contains(&self, code: &str) -> bool {
        self.codes.binary_search(&code.trim().to_lowercase()).is_ok()
    }

    /// Sanctuary name for a code's two-letter prefix.
    pub fn sanctuary(&self, code: &str) -> Option<&str> {
        let prefix: String = code.trim().to_lowercase().chars().take(2).collect();
        self.sanctuaries.get(&prefix).map(String::as_str)
    }

    /// `ci01` -> `Channel Islands — CI01`
    pub fn label_for_code(&self, code: &str) -> String {
        let code = code.trim().to_lowercase();
        let friendly = match self.sanctuary(&code) {
            Some(name) => name.to_string(),
            None => code.chars().take(2).collect::<String>().to_uppercase(),
        };
        format!("{} — {}", friendly, code.to_uppercase())
    }

    /// Labels for every known code, sorted by code.
    pub fn labels(&self) -> Vec<String> {
        self.codes.iter().map(|c| self.label_for_code(c)).collect()
    }
}

/// Inverse of [`SiteDirectory::label_for_code`]; bare codes pass through lowercased.
pub fn code_for_label(label: &str) -> String {
    let tail = if label.contains('—') {
        label.rsplit('—').next()
    } else {
        label.rsplit('-').next()
    };
    tail.unwrap_or(label).trim().to_lowercase()
}
