//! Filter flags shared by the `sql` and `query` commands.

use anyhow::Result;
use chrono::{DateTime, Utc};
use clap::Args;
use serde_json::Value;
use snapq_core::{BaseFilter, CommitId, GlobalId, PropertyValue, QueryParams};

#[derive(Debug, Args)]
pub struct QueryArgs {
    /// Managed type to select (repeatable)
    #[arg(long = "type", value_name = "TYPE")]
    pub types: Vec<String>,

    /// Select one entity instance
    #[arg(long, value_name = "TYPE/ID", conflicts_with = "types", value_parser = parse_instance)]
    pub instance: Option<GlobalId>,

    /// Include value objects owned by the selected entities
    #[arg(long)]
    pub aggregate: bool,

    /// Earliest commit date, inclusive
    #[arg(long, value_name = "RFC3339", value_parser = parse_date)]
    pub from: Option<DateTime<Utc>>,

    /// Latest commit date, inclusive
    #[arg(long, value_name = "RFC3339", value_parser = parse_date)]
    pub to: Option<DateTime<Utc>>,

    /// Commit id such as 3.01 (repeatable)
    #[arg(long = "commit", value_name = "ID")]
    pub commits: Vec<CommitId>,

    /// Exact snapshot version
    #[arg(long)]
    pub version: Option<u64>,

    #[arg(long)]
    pub author: Option<String>,

    /// Commit property (repeatable, all must match)
    #[arg(long = "prop", value_name = "KEY=VALUE", value_parser = parse_pair)]
    pub props: Vec<(String, String)>,

    /// Property among the changed properties
    #[arg(long, value_name = "PROP")]
    pub changed: Option<String>,

    /// Property value in the snapshot state; JSON, or plain text
    #[arg(long, value_name = "NAME=JSON", value_parser = parse_value_pair)]
    pub value: Option<(String, PropertyValue)>,

    /// Exclude INITIAL snapshots
    #[arg(long)]
    pub skip_new: bool,

    /// Page size [default: SNAPQ_DEFAULT_LIMIT]
    #[arg(long)]
    pub limit: Option<usize>,

    /// Rows skipped before the page
    #[arg(long, default_value_t = 0)]
    pub skip: usize,
}

impl QueryArgs {
    /// Build the base filter and query params, falling back to
    /// `default_limit` for the page size.
    pub fn into_query(self, default_limit: usize) -> Result<(BaseFilter, QueryParams)> {
        let filter = match self.instance {
            Some(global_id) => BaseFilter::instance(global_id, self.aggregate),
            None if self.types.is_empty() => BaseFilter::AnyType,
            None => BaseFilter::managed_types(self.types, self.aggregate)?,
        };

        let mut builder = QueryParams::builder()
            .limit(self.limit.unwrap_or(default_limit))
            .skip(self.skip)
            .aggregate(self.aggregate)
            .commit_ids(self.commits);
        if let Some(from) = self.from {
            builder = builder.from(from);
        }
        if let Some(to) = self.to {
            builder = builder.to(to);
        }
        if let Some(version) = self.version {
            builder = builder.version(version);
        }
        if let Some(author) = self.author {
            builder = builder.author(author);
        }
        for (key, value) in self.props {
            builder = builder.commit_property(key, value);
        }
        if let Some(changed) = self.changed {
            builder = builder.changed_property(changed);
        }
        if let Some((name, value)) = self.value {
            builder = builder.property_value(name, value);
        }
        if self.skip_new {
            builder = builder.new_object_changes(false);
        }

        Ok((filter, builder.build()))
    }
}

fn parse_instance(raw: &str) -> Result<GlobalId, String> {
    match raw.split_once('/') {
        Some((type_name, local_id)) if !type_name.is_empty() && !local_id.is_empty() => {
            Ok(GlobalId::instance(type_name, local_id))
        }
        _ => Err("expected TYPE/ID".to_string()),
    }
}

fn parse_date(raw: &str) -> Result<DateTime<Utc>, String> {
    DateTime::parse_from_rfc3339(raw)
        .map(|date| date.with_timezone(&Utc))
        .map_err(|e| format!("expected RFC 3339: {e}"))
}

fn parse_pair(raw: &str) -> Result<(String, String), String> {
    raw.split_once('=')
        .filter(|(key, _)| !key.is_empty())
        .map(|(key, value)| (key.to_string(), value.to_string()))
        .ok_or_else(|| "expected NAME=VALUE".to_string())
}

fn parse_value_pair(raw: &str) -> Result<(String, PropertyValue), String> {
    let (name, value) = parse_pair(raw)?;
    Ok((name, parse_property_value(&value)))
}

/// JSON when it parses, plain text otherwise.
fn parse_property_value(raw: &str) -> PropertyValue {
    serde_json::from_str::<Value>(raw).map_or_else(|_| PropertyValue::from(raw), PropertyValue::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::error::ErrorKind;
    use clap::Parser;

    #[derive(Debug, Parser)]
    struct Cmd {
        #[command(flatten)]
        args: QueryArgs,
    }

    fn parse(raw: &[&str]) -> Result<(BaseFilter, QueryParams)> {
        let cmd = Cmd::try_parse_from(std::iter::once("snapq").chain(raw.iter().copied()))?;
        cmd.args.into_query(100)
    }

    #[test]
    fn no_flags_select_everything() {
        let cmd = Cmd::try_parse_from(["snapq"]).unwrap();
        let (filter, params) = cmd.args.into_query(50).unwrap();
        assert_eq!(filter, BaseFilter::AnyType);
        assert_eq!(params.limit(), 50);
    }

    #[test]
    fn repeated_types_with_aggregate() {
        let (filter, params) =
            parse(&["--type", "Person", "--type", "Company", "--aggregate"]).unwrap();
        assert_eq!(
            filter,
            BaseFilter::managed_types(["Company", "Person"], true).unwrap()
        );
        assert!(params.is_aggregate());
    }

    #[test]
    fn every_criterion_is_parsed() {
        let (filter, params) = parse(&[
            "--instance",
            "Person/bob",
            "--from",
            "2024-01-01T00:00:00Z",
            "--to",
            "2024-02-01T00:00:00+01:00",
            "--commit",
            "3.01",
            "--commit",
            "4",
            "--version",
            "2",
            "--author",
            "kate",
            "--prop",
            "dept=IT",
            "--changed",
            "age",
            "--value",
            "age=31",
            "--skip-new",
            "--limit",
            "5",
            "--skip",
            "10",
        ])
        .unwrap();

        assert_eq!(
            filter,
            BaseFilter::instance(GlobalId::instance("Person", "bob"), false)
        );
        assert!(params.commit_ids().contains(&CommitId::new(3, 1).unwrap()));
        assert!(params.commit_ids().contains(&CommitId::major(4)));
        assert_eq!(params.version(), Some(2));
        assert_eq!(params.author(), Some("kate"));
        assert_eq!(params.commit_properties().get("dept").map(String::as_str), Some("IT"));
        assert_eq!(params.changed_property(), Some("age"));
        assert_eq!(params.property_value_name(), Some("age"));
        assert_eq!(params.property_value(), Some(&PropertyValue::Integer(31)));
        assert!(params.skips_initial());
        assert_eq!((params.limit(), params.skip()), (5, 10));
        assert_eq!(
            params.to().map(|d| d.to_rfc3339()),
            Some("2024-01-31T23:00:00+00:00".to_string())
        );
    }

    #[test]
    fn non_json_value_is_text() {
        assert_eq!(
            parse_property_value("Paris"),
            PropertyValue::Text("Paris".to_string())
        );
        assert_eq!(
            parse_property_value("\"Paris\""),
            PropertyValue::Text("Paris".to_string())
        );
    }

    #[test]
    fn instance_conflicts_with_type() {
        let err = Cmd::try_parse_from(["snapq", "--type", "A", "--instance", "A/1"]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ArgumentConflict);
    }

    #[test]
    fn bad_values_are_rejected_by_the_parser() {
        for bad in [
            vec!["--limit"],
            vec!["--limit", "many"],
            vec!["--instance", "bob"],
            vec!["--prop", "novalue"],
            vec!["--value", "=1"],
            vec!["--from", "yesterday"],
            vec!["--commit", "1.100"],
            vec!["--commit", "70368744177664"],
            vec!["--frobnicate"],
        ] {
            let raw = std::iter::once("snapq").chain(bad.iter().copied());
            assert!(Cmd::try_parse_from(raw).is_err(), "{bad:?}");
        }
    }
}
