//! Placeholder parsing and substitution for deferred value resolution.
//!
//! Placeholders let a resource reference values that aren't known until
//! another resource has been created, such as a bucket's ARN inside a policy
//! statement. They are also the only way dependencies between resources are
//! expressed: every `ref` placeholder becomes an edge in the dependency graph.
//!
//! # Placeholder Formats
//!
//! - `$${ref:<id>:<attribute>}` - computed attribute of another declared resource
//! - `$${env:<key>}` - explicit environment configuration (`region`, `account`)
//!
//! # Policy Variables
//!
//! Single `$` characters pass through unchanged, so policy variables like
//! `${aws:username}` work naturally without any escaping.
//!
//! # Escaping
//!
//! Use `$$$` before `{` to produce a literal `$${` sequence.
//!
//! # Example
//!
//! ```
//! use stackflow_lib::placeholder::{parse, Segment, Placeholder};
//!
//! let segments = parse("$${ref:prod:arn}/*").unwrap();
//! assert_eq!(segments, vec![
//!     Segment::Placeholder(Placeholder::Ref { id: "prod".to_string(), attribute: "arn".to_string() }),
//!     Segment::Literal("/*".to_string()),
//! ]);
//! ```

use std::collections::BTreeSet;

use serde_json::Value;
use thiserror::Error;

/// A parsed placeholder reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Placeholder {
  /// `$${ref:<id>:<attribute>}` - computed attribute of a declared resource
  Ref { id: String, attribute: String },

  /// `$${env:<key>}` - environment configuration value
  Env(String),
}

impl Placeholder {
  /// Human-readable symbol used in error messages and plan output.
  pub fn symbol(&self) -> String {
    match self {
      Placeholder::Ref { id, attribute } => format!("{id}.{attribute}"),
      Placeholder::Env(key) => format!("env.{key}"),
    }
  }
}

/// A segment of parsed text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
  /// Literal text (no placeholders)
  Literal(String),

  /// A placeholder to be resolved
  Placeholder(Placeholder),
}

/// Errors that can occur during placeholder parsing or resolution.
#[derive(Debug, Clone, PartialEq, Eq, Error, serde::Serialize, serde::Deserialize)]
pub enum PlaceholderError {
  #[error("unclosed placeholder at position {0}")]
  Unclosed(usize),

  #[error("unknown placeholder type: {0}")]
  UnknownType(String),

  #[error("malformed placeholder: {0}")]
  Malformed(String),

  #[error("unresolved reference: {id}.{attribute}")]
  UnresolvedRef { id: String, attribute: String },

  #[error("unknown environment value: {0}")]
  UnknownEnv(String),
}

impl PlaceholderError {
  /// The symbol that could not be resolved, if this is a resolution failure.
  pub fn unresolved_symbol(&self) -> Option<String> {
    match self {
      PlaceholderError::UnresolvedRef { id, attribute } => Some(format!("{id}.{attribute}")),
      _ => None,
    }
  }
}

/// Trait for resolving placeholder values.
pub trait Resolver {
  /// Resolve a computed attribute of a declared resource.
  fn resolve_ref(&self, id: &str, attribute: &str) -> Result<&str, PlaceholderError>;

  /// Resolve an environment value (`region`, `account`).
  fn resolve_env(&self, key: &str) -> Result<&str, PlaceholderError>;
}

/// Parse a string containing placeholders into segments.
///
/// # Errors
///
/// Returns an error if a placeholder is malformed (unclosed, unknown type, etc.)
pub fn parse(input: &str) -> Result<Vec<Segment>, PlaceholderError> {
  let mut segments = Vec::new();
  let mut literal = String::new();
  let mut chars = input.char_indices().peekable();

  while let Some((pos, ch)) = chars.next() {
    if ch != '$' {
      literal.push(ch);
      continue;
    }

    match chars.peek() {
      Some((_, '$')) => {
        chars.next();

        match chars.peek() {
          Some((_, '$')) => {
            chars.next();

            match chars.peek() {
              Some((_, '{')) => {
                // Escaped: $$${ -> $${ (literal)
                literal.push_str("$${");
                chars.next();
              }
              _ => literal.push_str("$$$"),
            }
          }
          Some((_, '{')) => {
            chars.next();

            if !literal.is_empty() {
              segments.push(Segment::Literal(std::mem::take(&mut literal)));
            }

            let mut content = String::new();
            let mut found_close = false;

            for (_, c) in chars.by_ref() {
              if c == '}' {
                found_close = true;
                break;
              }
              content.push(c);
            }

            if !found_close {
              return Err(PlaceholderError::Unclosed(pos));
            }

            segments.push(Segment::Placeholder(parse_placeholder_content(&content)?));
          }
          _ => literal.push_str("$$"),
        }
      }
      // A lone $ is literal, so policy variables like ${aws:username} pass through
      _ => literal.push('$'),
    }
  }

  if !literal.is_empty() {
    segments.push(Segment::Literal(literal));
  }

  Ok(segments)
}

/// Parse the content inside a placeholder (everything between `$${` and `}`).
fn parse_placeholder_content(content: &str) -> Result<Placeholder, PlaceholderError> {
  let (kind, rest) = content
    .split_once(':')
    .ok_or_else(|| PlaceholderError::Malformed(format!("missing colon in '{content}'")))?;

  match kind {
    "ref" => {
      let (id, attribute) = rest
        .split_once(':')
        .ok_or_else(|| PlaceholderError::Malformed(format!("ref placeholder missing attribute: '{content}'")))?;
      if id.is_empty() || attribute.is_empty() {
        return Err(PlaceholderError::Malformed(format!("empty ref component in '{content}'")));
      }
      Ok(Placeholder::Ref {
        id: id.to_string(),
        attribute: attribute.to_string(),
      })
    }
    "env" => {
      if rest.is_empty() {
        return Err(PlaceholderError::Malformed(format!("env placeholder missing key: '{content}'")));
      }
      Ok(Placeholder::Env(rest.to_string()))
    }
    _ => Err(PlaceholderError::UnknownType(kind.to_string())),
  }
}

/// Substitute all placeholders in a string using the provided resolver.
///
/// # Errors
///
/// Returns an error if parsing fails or if any placeholder cannot be resolved.
pub fn substitute(input: &str, resolver: &impl Resolver) -> Result<String, PlaceholderError> {
  let segments = parse(input)?;
  substitute_segments(&segments, resolver)
}

/// Substitute placeholders in pre-parsed segments.
pub fn substitute_segments(segments: &[Segment], resolver: &impl Resolver) -> Result<String, PlaceholderError> {
  let mut result = String::new();

  for segment in segments {
    match segment {
      Segment::Literal(s) => result.push_str(s),
      Segment::Placeholder(p) => {
        let value = match p {
          Placeholder::Ref { id, attribute } => resolver.resolve_ref(id, attribute)?,
          Placeholder::Env(key) => resolver.resolve_env(key)?,
        };
        result.push_str(value);
      }
    }
  }

  Ok(result)
}

/// Substitute placeholders in every string nested inside a JSON value.
///
/// Object keys are left untouched; only string values are substituted.
pub fn substitute_value(value: &Value, resolver: &impl Resolver) -> Result<Value, PlaceholderError> {
  Ok(match value {
    Value::String(s) => Value::String(substitute(s, resolver)?),
    Value::Array(items) => Value::Array(
      items
        .iter()
        .map(|item| substitute_value(item, resolver))
        .collect::<Result<_, _>>()?,
    ),
    Value::Object(map) => {
      let mut out = serde_json::Map::with_capacity(map.len());
      for (key, item) in map {
        out.insert(key.clone(), substitute_value(item, resolver)?);
      }
      Value::Object(out)
    }
    other => other.clone(),
  })
}

/// Collect every placeholder nested inside a JSON value, in document order.
pub fn collect_placeholders(value: &Value) -> Result<Vec<Placeholder>, PlaceholderError> {
  let mut found = Vec::new();
  collect_into(value, &mut found)?;
  Ok(found)
}

fn collect_into(value: &Value, found: &mut Vec<Placeholder>) -> Result<(), PlaceholderError> {
  match value {
    Value::String(s) => {
      for segment in parse(s)? {
        if let Segment::Placeholder(p) = segment {
          found.push(p);
        }
      }
    }
    Value::Array(items) => {
      for item in items {
        collect_into(item, found)?;
      }
    }
    Value::Object(map) => {
      for item in map.values() {
        collect_into(item, found)?;
      }
    }
    _ => {}
  }
  Ok(())
}

/// Every `ref` symbol in `value` that `resolver` cannot resolve, sorted.
pub fn unresolved_refs(value: &Value, resolver: &impl Resolver) -> Result<BTreeSet<String>, PlaceholderError> {
  let mut missing = BTreeSet::new();
  for placeholder in collect_placeholders(value)? {
    if let Placeholder::Ref { id, attribute } = &placeholder
      && resolver.resolve_ref(id, attribute).is_err()
    {
      missing.insert(placeholder.symbol());
    }
  }
  Ok(missing)
}

/// Returns true if the string contains at least one placeholder.
pub fn contains_placeholder(input: &str) -> bool {
  parse(input)
    .map(|segments| segments.iter().any(|s| matches!(s, Segment::Placeholder(_))))
    .unwrap_or(false)
}

#[cfg(test)]
mod tests {
  use std::collections::HashMap;

  use serde_json::json;

  use super::*;

  struct TestResolver {
    refs: HashMap<(String, String), String>,
    env: HashMap<String, String>,
  }

  impl TestResolver {
    fn new() -> Self {
      Self {
        refs: HashMap::new(),
        env: HashMap::new(),
      }
    }

    fn with_ref(mut self, id: &str, attribute: &str, value: &str) -> Self {
      self
        .refs
        .insert((id.to_string(), attribute.to_string()), value.to_string());
      self
    }

    fn with_env(mut self, key: &str, value: &str) -> Self {
      self.env.insert(key.to_string(), value.to_string());
      self
    }
  }

  impl Resolver for TestResolver {
    fn resolve_ref(&self, id: &str, attribute: &str) -> Result<&str, PlaceholderError> {
      self
        .refs
        .get(&(id.to_string(), attribute.to_string()))
        .map(|s| s.as_str())
        .ok_or_else(|| PlaceholderError::UnresolvedRef {
          id: id.to_string(),
          attribute: attribute.to_string(),
        })
    }

    fn resolve_env(&self, key: &str) -> Result<&str, PlaceholderError> {
      self
        .env
        .get(key)
        .map(|s| s.as_str())
        .ok_or_else(|| PlaceholderError::UnknownEnv(key.to_string()))
    }
  }

  #[test]
  fn parse_ref_and_literal() {
    let segments = parse("$${ref:prod:arn}/*").unwrap();
    assert_eq!(
      segments,
      vec![
        Segment::Placeholder(Placeholder::Ref {
          id: "prod".to_string(),
          attribute: "arn".to_string(),
        }),
        Segment::Literal("/*".to_string()),
      ]
    );
  }

  #[test]
  fn parse_env() {
    let segments = parse("region=$${env:region}").unwrap();
    assert_eq!(
      segments,
      vec![
        Segment::Literal("region=".to_string()),
        Segment::Placeholder(Placeholder::Env("region".to_string())),
      ]
    );
  }

  #[test]
  fn bucket_object_arn_in_policy_resource() {
    let resolver = TestResolver::new().with_ref("prod", "arn", "arn:aws:s3:::prod-site");
    let result = substitute("$${ref:prod:arn}/*", &resolver).unwrap();
    assert_eq!(result, "arn:aws:s3:::prod-site/*");
  }

  #[test]
  fn policy_variables_pass_through() {
    let resolver = TestResolver::new().with_ref("home", "arn", "arn:aws:s3:::homes");
    let result = substitute("$${ref:home:arn}/${aws:username}/*", &resolver).unwrap();
    assert_eq!(result, "arn:aws:s3:::homes/${aws:username}/*");
  }

  #[test]
  fn website_url_from_domain_and_env() {
    let resolver = TestResolver::new()
      .with_ref("prod", "website_domain", "prod.s3-website-eu-west-1.amazonaws.com")
      .with_env("region", "eu-west-1");
    let result = substitute("http://$${ref:prod:website_domain}/ ($${env:region})", &resolver).unwrap();
    assert_eq!(result, "http://prod.s3-website-eu-west-1.amazonaws.com/ (eu-west-1)");
  }

  #[test]
  fn substitute_value_walks_nested_json() {
    let resolver = TestResolver::new().with_ref("prod", "arn", "arn:aws:s3:::prod");
    let value = json!({
      "Statement": [{ "Resource": ["$${ref:prod:arn}", "$${ref:prod:arn}/*"], "Effect": "Allow" }],
      "count": 2,
    });

    let result = substitute_value(&value, &resolver).unwrap();
    assert_eq!(
      result,
      json!({
        "Statement": [{ "Resource": ["arn:aws:s3:::prod", "arn:aws:s3:::prod/*"], "Effect": "Allow" }],
        "count": 2,
      })
    );
  }

  #[test]
  fn collect_placeholders_in_document_order() {
    let value = json!(["$${ref:a:name}", { "k": "$${env:region}-$${ref:b:arn}" }]);
    let found = collect_placeholders(&value).unwrap();
    let symbols: Vec<_> = found.iter().map(Placeholder::symbol).collect();
    assert_eq!(symbols, vec!["a.name", "env.region", "b.arn"]);
  }

  #[test]
  fn unresolved_refs_lists_only_missing() {
    let resolver = TestResolver::new().with_ref("a", "name", "bucket-a");
    let value = json!({ "x": "$${ref:a:name}", "y": "$${ref:b:arn}", "z": "$${ref:c:arn}" });
    let missing = unresolved_refs(&value, &resolver).unwrap();
    assert_eq!(missing.into_iter().collect::<Vec<_>>(), vec!["b.arn", "c.arn"]);
  }

  #[test]
  fn contains_placeholder_detection() {
    assert!(contains_placeholder("x-$${ref:a:name}"));
    assert!(!contains_placeholder("plain ${aws:username}"));
    assert!(!contains_placeholder("$${broken"));
  }

  #[test]
  fn error_unclosed_placeholder() {
    let result = parse("arn:$${ref:prod:arn");
    assert!(matches!(result, Err(PlaceholderError::Unclosed(4))));
  }

  #[test]
  fn error_unknown_placeholder_type() {
    let result = parse("$${build:foo}");
    assert!(matches!(result, Err(PlaceholderError::UnknownType(ref s)) if s == "build"));
  }

  #[test]
  fn error_ref_missing_attribute() {
    assert!(matches!(parse("$${ref:prod}"), Err(PlaceholderError::Malformed(_))));
    assert!(matches!(parse("$${ref::arn}"), Err(PlaceholderError::Malformed(_))));
  }

  #[test]
  fn error_missing_colon() {
    assert!(matches!(parse("$${region}"), Err(PlaceholderError::Malformed(_))));
  }

  #[test]
  fn error_unresolved_ref_names_symbol() {
    let resolver = TestResolver::new();
    let err = substitute("$${ref:staging:arn}", &resolver).unwrap_err();
    assert_eq!(err.unresolved_symbol().as_deref(), Some("staging.arn"));
    assert_eq!(err.to_string(), "unresolved reference: staging.arn");
  }

  #[test]
  fn error_unknown_env() {
    let resolver = TestResolver::new();
    let result = substitute("$${env:zone}", &resolver);
    assert!(matches!(result, Err(PlaceholderError::UnknownEnv(ref k)) if k == "zone"));
  }

  #[test]
  fn lone_dollar_preserved() {
    let resolver = TestResolver::new();
    assert_eq!(substitute("costs $5 or more$", &resolver).unwrap(), "costs $5 or more$");
  }

  #[test]
  fn double_dollar_without_brace_preserved() {
    let resolver = TestResolver::new();
    assert_eq!(substitute("a $$b", &resolver).unwrap(), "a $$b");
  }

  #[test]
  fn escape_placeholder_syntax() {
    let resolver = TestResolver::new();
    let result = substitute("literal $$${ref:a:b}", &resolver).unwrap();
    assert_eq!(result, "literal $${ref:a:b}");
  }

  #[test]
  fn adjacent_placeholders_no_separator() {
    let resolver = TestResolver::new().with_ref("a", "name", "foo").with_ref("b", "name", "bar");
    let result = substitute("$${ref:a:name}$${ref:b:name}", &resolver).unwrap();
    assert_eq!(result, "foobar");
  }

  #[test]
  fn empty_input() {
    assert!(parse("").unwrap().is_empty());
  }
}
