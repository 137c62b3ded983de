//! Translation of an option group into the flags of a downstream tool.

use std::path::Path;

/// Value of a forwarded option as the driver holds it.
#[derive(Debug, Clone, PartialEq)]
pub enum OptionValue {
    Bool(bool),
    Int(i64),
    Text(String),
    Null,
}

impl From<bool> for OptionValue {
    fn from(v: bool) -> Self {
        OptionValue::Bool(v)
    }
}

impl From<i64> for OptionValue {
    fn from(v: i64) -> Self {
        OptionValue::Int(v)
    }
}

impl From<&str> for OptionValue {
    fn from(v: &str) -> Self {
        OptionValue::Text(v.to_string())
    }
}

impl<T: Into<OptionValue>> From<Option<T>> for OptionValue {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(OptionValue::Null)
    }
}

/// One flag of an option group, e.g. `-o` bound to `out_dir`.
#[derive(Debug, Clone, PartialEq)]
pub struct ForwardedOption {
    pub flag: &'static str,
    pub dest: &'static str,
    pub value: OptionValue,
}

impl ForwardedOption {
    pub fn new(flag: &'static str, dest: &'static str, value: impl Into<OptionValue>) -> Self {
        ForwardedOption {
            flag,
            dest,
            value: value.into(),
        }
    }
}

/// Destination whose value is always replaced by the replicate directory.
pub const OUT_DIR_DEST: &str = "out_dir";

/// Render `group` as command-line arguments for one replicate.
pub fn options_string(group: &[ForwardedOption], rep_dir: &Path) -> String {
    let mut parts: Vec<String> = Vec::with_capacity(group.len());

    for opt in group {
        if opt.dest == OUT_DIR_DEST {
            parts.push(format!("{} {}", opt.flag, rep_dir.display()));
            continue;
        }

        match &opt.value {
            OptionValue::Bool(true) => parts.push(opt.flag.to_string()),
            OptionValue::Bool(false) | OptionValue::Null => {}
            OptionValue::Int(v) => parts.push(format!("{} {}", opt.flag, v)),
            OptionValue::Text(v) if v.contains('*') => parts.push(format!("{} \"{}\"", opt.flag, v)),
            OptionValue::Text(v) => parts.push(format!("{} {}", opt.flag, v)),
        }
    }

    parts.join(" ")
}
