//! Default rule-application function: the rule payload is a template whose
//! first `{}` is replaced by the item's `Display` form.

use std::fmt::Display;

use ruleraft_core::RuleVersion;

use crate::error::ApplyError;

pub fn render_placeholder<T: Display>(item: &T, rule: &RuleVersion) -> Result<String, ApplyError> {
    let template = rule.payload();
    if !template.contains("{}") {
        return Err(ApplyError::new(format!(
            "rule version {} has no {{}} placeholder",
            rule.version()
        )));
    }
    Ok(template.replacen("{}", &item.to_string(), 1))
}
