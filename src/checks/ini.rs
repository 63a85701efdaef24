//! Minimal INI reader for the AWS `config` and `credentials` files

use std::collections::HashMap;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IniSection {
  pub name: String,
  pub properties: HashMap<String, String>,
}

impl IniSection {
  pub fn get(&self, key: &str) -> Option<&str> {
    self.properties.get(key).map(String::as_str)
  }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IniFile {
  pub sections: Vec<IniSection>,
}

impl IniFile {
  /// Parse `[section]` headers and `key = value` lines
  ///
  /// Lines outside any section, blank lines and `#`/`;` comments are
  /// skipped. Values keep any further `=` characters.
  pub fn parse(contents: &str) -> Self {
    let mut sections: Vec<IniSection> = Vec::new();

    for line in contents.lines() {
      let line = line.trim();
      if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
        continue;
      }

      if let Some(name) = line.strip_prefix('[').and_then(|rest| rest.strip_suffix(']')) {
        sections.push(IniSection {
          name: name.trim().to_string(),
          properties: HashMap::new(),
        });
        continue;
      }

      if let Some((key, value)) = line.split_once('=')
        && let Some(section) = sections.last_mut()
      {
        section
          .properties
          .insert(key.trim().to_string(), value.trim().to_string());
      }
    }

    Self { sections }
  }

  /// First section called `name`
  pub fn section(&self, name: &str) -> Option<&IniSection> {
    self.sections.iter().find(|section| section.name == name)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_parse_sections_and_properties() {
    let ini = IniFile::parse(
      "[default]\nregion = eu-west-1\n\n[profile localstack]\nregion=us-east-1\n  endpoint_url = http://127.0.0.1:4566\n",
    );
    assert_eq!(ini.sections.len(), 2);
    let profile = ini.section("profile localstack").unwrap();
    assert_eq!(profile.get("region"), Some("us-east-1"));
    assert_eq!(profile.get("endpoint_url"), Some("http://127.0.0.1:4566"));
  }

  #[test]
  fn test_comments_and_orphan_lines_are_skipped() {
    let ini = IniFile::parse("orphan = 1\n# [commented]\n[localstack]\n; note = x\naws_access_key_id = test\n");
    assert_eq!(ini.sections.len(), 1);
    let section = ini.section("localstack").unwrap();
    assert_eq!(section.properties.len(), 1);
    assert_eq!(section.get("aws_access_key_id"), Some("test"));
  }

  #[test]
  fn test_value_keeps_extra_equals() {
    let ini = IniFile::parse("[s]\ntoken = abc==\n");
    assert_eq!(ini.section("s").unwrap().get("token"), Some("abc=="));
  }

  #[test]
  fn test_windows_line_endings() {
    let ini = IniFile::parse("[localstack]\r\naws_secret_access_key = test\r\n");
    assert_eq!(ini.section("localstack").unwrap().get("aws_secret_access_key"), Some("test"));
  }

  #[test]
  fn test_missing_section() {
    assert!(IniFile::parse("").section("localstack").is_none());
  }
}
