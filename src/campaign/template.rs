//! HTML message templates with `{{ key }}` placeholders.

use std::collections::BTreeMap;
use std::path::Path;

use regex::Regex;

use super::stage::Stage;
use crate::error::TemplateError;
use crate::ledger::Contact;

const PLACEHOLDER: &str = r"\{\{\s*([A-Za-z_][A-Za-z0-9_]*)\s*\}\}";

/// A parsed template. Values are HTML-escaped; unknown keys render empty.
#[derive(Debug, Clone)]
pub struct Template {
    name: String,
    source: String,
    placeholder: Regex,
}

impl Template {
    pub fn parse(name: impl Into<String>, source: impl Into<String>) -> Result<Self, TemplateError> {
        Ok(Self {
            name: name.into(),
            source: source.into(),
            placeholder: Regex::new(PLACEHOLDER)?,
        })
    }

    /// Load the template file for `stage` from `dir`.
    pub fn load(dir: &Path, stage: Stage) -> Result<Self, TemplateError> {
        let path = dir.join(stage.template_file());
        if !path.is_file() {
            return Err(TemplateError::NotFound(path));
        }
        let source = std::fs::read_to_string(&path).map_err(|source| TemplateError::Io {
            path: path.clone(),
            source,
        })?;
        Self::parse(stage.template_file(), source)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn render(&self, vars: &BTreeMap<String, String>) -> String {
        self.placeholder
            .replace_all(&self.source, |caps: &regex::Captures<'_>| {
                vars.get(&caps[1]).map(|v| escape_html(v)).unwrap_or_default()
            })
            .into_owned()
    }

    /// Keys referenced by the template, in order of first use.
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = Vec::new();
        for caps in self.placeholder.captures_iter(&self.source) {
            if !keys.iter().any(|k| k == &caps[1]) {
                keys.push(caps[1].to_string());
            }
        }
        keys
    }

    /// Keys the template uses that `vars` has no value for.
    pub fn unbound_keys(&self, vars: &BTreeMap<String, String>) -> Vec<String> {
        self.keys()
            .into_iter()
            .filter(|key| !vars.contains_key(key))
            .collect()
    }
}

/// The variables available to a message: the contact's identity fields,
/// its extra columns, and `video_url`.
pub fn contact_vars(contact: &Contact, video_url: &str) -> BTreeMap<String, String> {
    let mut vars: BTreeMap<String, String> = contact.extra.clone();
    vars.insert("email".into(), contact.email.clone());
    vars.insert("first_name".into(), contact.first_name.clone());
    vars.insert("last_name".into(), contact.last_name.clone());
    vars.insert("company_name".into(), contact.company_name.clone());
    vars.insert("video_url".into(), video_url.to_string());
    vars
}

pub fn escape_html(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for ch in raw.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            other => out.push(other),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn fills_placeholders_with_and_without_spaces() {
        let tpl = Template::parse("t", "<p>Bonjour {{first_name}}, {{ company_name }}</p>").unwrap();
        let out = tpl.render(&vars(&[("first_name", "Alice"), ("company_name", "Agence")]));
        assert_eq!(out, "<p>Bonjour Alice, Agence</p>");
    }

    #[test]
    fn unknown_keys_render_empty() {
        let tpl = Template::parse("t", "Hi {{ nickname }}!").unwrap();
        assert_eq!(tpl.render(&BTreeMap::new()), "Hi !");
    }

    #[test]
    fn values_are_escaped() {
        let tpl = Template::parse("t", "{{ company_name }}").unwrap();
        let out = tpl.render(&vars(&[("company_name", "Durand & Fils <SARL>")]));
        assert_eq!(out, "Durand &amp; Fils &lt;SARL&gt;");
    }

    #[test]
    fn non_placeholder_braces_are_left_alone() {
        let tpl = Template::parse("t", "a { b } {{ 1x }}").unwrap();
        assert_eq!(tpl.render(&BTreeMap::new()), "a { b } {{ 1x }}");
    }

    #[test]
    fn lists_keys_once() {
        let tpl = Template::parse("t", "{{ a }} {{b}} {{ a }}").unwrap();
        assert_eq!(tpl.keys(), vec!["a", "b"]);
    }

    #[test]
    fn unbound_keys_are_those_without_a_value() {
        let tpl = Template::parse("t", "{{ first_name }} {{ city }} {{ video_url }} {{ city }}").unwrap();
        let mut contact = Contact::default();
        contact.first_name = "Alice".into();
        assert_eq!(tpl.unbound_keys(&contact_vars(&contact, "")), vec!["city"]);
        contact.extra.insert("city".into(), "Lyon".into());
        assert!(tpl.unbound_keys(&contact_vars(&contact, "")).is_empty());
    }

    #[test]
    fn load_reports_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            Template::load(dir.path(), Stage::Nudge2),
            Err(TemplateError::NotFound(_))
        ));
        std::fs::write(dir.path().join("template_nudge2.html"), "{{ video_url }}").unwrap();
        let tpl = Template::load(dir.path(), Stage::Nudge2).unwrap();
        assert_eq!(tpl.name(), "template_nudge2.html");
    }

    #[test]
    fn contact_vars_include_extra_columns() {
        let mut contact = Contact::default();
        contact.email = "a@x.com".into();
        contact.first_name = "Alice".into();
        contact.extra.insert("city".into(), "Lyon".into());
        let v = contact_vars(&contact, "https://v.example/1");
        assert_eq!(v["city"], "Lyon");
        assert_eq!(v["video_url"], "https://v.example/1");
        assert_eq!(v["first_name"], "Alice");
    }
}
