//! Row filters scoping which rows produce change events.
//!
//! Accepts the PostgREST form used by realtime services (`owner_id=eq.42`,
//! `status=in.(paid,refunded)`) and the plain comparison form
//! (`owner_id = 42`, `status != draft`).

use serde_json::Value;
use std::{cmp::Ordering, fmt, str::FromStr};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FilterError {
	#[error("filter `{0}` has no comparison operator")]
	MissingOperator(String),

	#[error("filter `{0}` has an empty column name")]
	EmptyColumn(String),

	#[error("filter `{0}` has a malformed value list")]
	InvalidList(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FilterOp {
	Eq,
	Neq,
	Gt,
	Gte,
	Lt,
	Lte,
	In,
}

impl FilterOp {
	fn from_prefix(prefix: &str) -> Option<Self> {
		match prefix {
			"eq" => Some(Self::Eq),
			"neq" => Some(Self::Neq),
			"gt" => Some(Self::Gt),
			"gte" => Some(Self::Gte),
			"lt" => Some(Self::Lt),
			"lte" => Some(Self::Lte),
			"in" => Some(Self::In),
			_ => None,
		}
	}

	const fn as_str(self) -> &'static str {
		match self {
			Self::Eq => "eq",
			Self::Neq => "neq",
			Self::Gt => "gt",
			Self::Gte => "gte",
			Self::Lt => "lt",
			Self::Lte => "lte",
			Self::In => "in",
		}
	}
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RowFilter {
	pub column: String,
	pub op: FilterOp,
	pub values: Vec<String>,
}

impl RowFilter {
	/// Parse a filter string.
	///
	/// # Errors
	/// Returns [`FilterError`] when the column is empty, no operator is
	/// present, or an `in` list is not parenthesised.
	pub fn parse(raw: &str) -> Result<Self, FilterError> {
		// Only the first `=` separates the column; values may contain `=` or `!=`.
		let Some((column, value)) = raw.split_once('=') else {
			return Err(FilterError::MissingOperator(raw.to_string()));
		};
		let value = value.trim();
		let (column, op, rest) = if let Some(column) = column.strip_suffix('!') {
			(column, FilterOp::Neq, value)
		} else {
			match value.split_once('.').and_then(|(prefix, tail)| FilterOp::from_prefix(prefix).map(|op| (op, tail))) {
				Some((op, tail)) => (column, op, tail),
				None => (column, FilterOp::Eq, value),
			}
		};

		let column = column.trim();
		if column.is_empty() {
			return Err(FilterError::EmptyColumn(raw.to_string()));
		}

		let values = if op == FilterOp::In {
			let inner = rest
				.strip_prefix('(')
				.and_then(|s| s.strip_suffix(')'))
				.ok_or_else(|| FilterError::InvalidList(raw.to_string()))?;
			inner.split(',').map(|v| unquote(v.trim()).to_string()).filter(|v| !v.is_empty()).collect()
		} else {
			vec![unquote(rest).to_string()]
		};

		Ok(Self {
			column: column.to_string(),
			op,
			values,
		})
	}

	/// Evaluate the filter against a row image. Missing columns never match.
	#[must_use]
	pub fn matches(&self, record: &Value) -> bool {
		let Some(actual) = record.get(&self.column).map(scalar_text) else {
			return false;
		};

		match self.op {
			FilterOp::In => self.values.iter().any(|v| *v == actual),
			FilterOp::Eq => self.values.first().is_some_and(|v| *v == actual),
			FilterOp::Neq => self.values.first().is_some_and(|v| *v != actual),
			FilterOp::Gt => self.compare(&actual).is_some_and(Ordering::is_gt),
			FilterOp::Gte => self.compare(&actual).is_some_and(Ordering::is_ge),
			FilterOp::Lt => self.compare(&actual).is_some_and(Ordering::is_lt),
			FilterOp::Lte => self.compare(&actual).is_some_and(Ordering::is_le),
		}
	}

	// Numeric when both sides parse as numbers, lexical otherwise.
	fn compare(&self, actual: &str) -> Option<Ordering> {
		let expected = self.values.first()?;
		match (actual.parse::<f64>(), expected.parse::<f64>()) {
			(Ok(a), Ok(b)) => a.partial_cmp(&b),
			_ => Some(actual.cmp(expected.as_str())),
		}
	}
}

impl FromStr for RowFilter {
	type Err = FilterError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		Self::parse(s)
	}
}

impl fmt::Display for RowFilter {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		if self.op == FilterOp::In {
			write!(f, "{}=in.({})", self.column, self.values.join(","))
		} else {
			write!(f, "{}={}.{}", self.column, self.op.as_str(), self.values.join(","))
		}
	}
}

fn unquote(s: &str) -> &str {
	s.strip_prefix('\'').and_then(|v| v.strip_suffix('\'')).or_else(|| s.strip_prefix('"').and_then(|v| v.strip_suffix('"'))).unwrap_or(s)
}

fn scalar_text(value: &Value) -> String {
	match value {
		Value::String(s) => s.clone(),
		other => other.to_string(),
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use serde_json::json;

	#[test]
	fn test_parse_postgrest_form() {
		let filter = RowFilter::parse("owner_id=eq.42").unwrap();
		assert_eq!(filter.column, "owner_id");
		assert_eq!(filter.op, FilterOp::Eq);
		assert_eq!(filter.values, vec!["42".to_string()]);
	}

	#[test]
	fn test_parse_plain_form() {
		let filter = RowFilter::parse("owner_id = 'coach-7'").unwrap();
		assert_eq!(filter.op, FilterOp::Eq);
		assert_eq!(filter.values, vec!["coach-7".to_string()]);

		let filter = RowFilter::parse("status != draft").unwrap();
		assert_eq!(filter.op, FilterOp::Neq);
		assert_eq!(filter.values, vec!["draft".to_string()]);
	}

	#[test]
	fn test_parse_in_list() {
		let filter = RowFilter::parse("status=in.(paid, refunded)").unwrap();
		assert_eq!(filter.op, FilterOp::In);
		assert_eq!(filter.values, vec!["paid".to_string(), "refunded".to_string()]);
		assert_eq!(filter.to_string(), "status=in.(paid,refunded)");
	}

	#[test]
	fn test_parse_errors() {
		assert!(matches!(RowFilter::parse("owner_id"), Err(FilterError::MissingOperator(_))));
		assert!(matches!(RowFilter::parse(" =eq.1"), Err(FilterError::EmptyColumn(_))));
		assert!(matches!(RowFilter::parse("status=in.paid"), Err(FilterError::InvalidList(_))));
	}

	#[test]
	fn test_value_with_dot_is_not_an_operator() {
		let filter = RowFilter::parse("email=coach.smith@example.com").unwrap();
		assert_eq!(filter.op, FilterOp::Eq);
		assert_eq!(filter.values, vec!["coach.smith@example.com".to_string()]);
	}

	#[test]
	fn test_value_may_contain_not_equal() {
		let filter = RowFilter::parse("name=eq.a!=b").unwrap();
		assert_eq!(filter.column, "name");
		assert_eq!(filter.op, FilterOp::Eq);
		assert_eq!(filter.values, vec!["a!=b".to_string()]);

		let filter = RowFilter::parse("name != a=b").unwrap();
		assert_eq!(filter.column, "name");
		assert_eq!(filter.op, FilterOp::Neq);
		assert_eq!(filter.values, vec!["a=b".to_string()]);
	}

	#[test]
	fn test_matches_equality() {
		let filter = RowFilter::parse("owner_id=eq.42").unwrap();
		assert!(filter.matches(&json!({ "owner_id": 42 })));
		assert!(filter.matches(&json!({ "owner_id": "42" })));
		assert!(!filter.matches(&json!({ "owner_id": 7 })));
		assert!(!filter.matches(&json!({ "other": 42 })));
	}

	#[test]
	fn test_matches_ordering() {
		let gt = RowFilter::parse("amount=gt.100").unwrap();
		assert!(gt.matches(&json!({ "amount": 150.5 })));
		assert!(!gt.matches(&json!({ "amount": 20 })));

		let lte = RowFilter::parse("amount=lte.100").unwrap();
		assert!(lte.matches(&json!({ "amount": 100 })));
		assert!(!lte.matches(&json!({ "amount": 101 })));
	}

	#[test]
	fn test_matches_in() {
		let filter = RowFilter::parse("status=in.(paid,refunded)").unwrap();
		assert!(filter.matches(&json!({ "status": "refunded" })));
		assert!(!filter.matches(&json!({ "status": "pending" })));
	}
}
