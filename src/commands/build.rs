//! `proctree build`: load events, build the tree, render it

use crate::commands::parser::{BuildArgs, OutputFormat};
use crate::core::export::filter_by_time_window;
use crate::core::models::ProcessRecord;
use crate::core::process_tree::{BuildPolicy, ProcessTree};
use crate::error::{errors::io_error, ProcessTreeResult};
use crate::utils::config_paths::UserConfig;
use serde_json::{Deserializer, Value};
use std::io::Read;
use std::path::Path;
use tracing::{debug, warn};

/// Read events from a JSON array, or from a stream of JSON objects
/// (newline-delimited or otherwise whitespace separated). `-` reads stdin.
pub fn load_events(path: &Path) -> ProcessTreeResult<Vec<Value>> {
    let source_name = path.display().to_string();
    let content = if path.as_os_str() == "-" {
        let mut buffer = String::new();
        std::io::stdin()
            .read_to_string(&mut buffer)
            .map_err(|err| io_error("cannot read events", "<stdin>", err))?;
        buffer
    } else {
        std::fs::read_to_string(path)
            .map_err(|err| io_error("cannot read events", &source_name, err))?
    };

    let events = parse_events(&content)?;
    debug!(path = %source_name, events = events.len(), "events loaded");
    Ok(events)
}

pub fn parse_events(content: &str) -> ProcessTreeResult<Vec<Value>> {
    let mut values = Deserializer::from_str(content)
        .into_iter::<Value>()
        .collect::<Result<Vec<_>, _>>()?;

    if values.len() == 1 && values[0].is_array() {
        if let Some(Value::Array(events)) = values.pop() {
            return Ok(events);
        }
    }
    Ok(values)
}

/// Stable sort by target creation time; records without a usable time keep
/// their relative order at the front, where validation will report them.
pub fn sort_by_creation_time(events: &mut [Value]) {
    events.sort_by_cached_key(|event| {
        ProcessRecord::try_from(event)
            .ok()
            .map(|record| record.target().creation_time)
    });
}

pub fn execute(args: &BuildArgs, config: &UserConfig) -> ProcessTreeResult<String> {
    let mut events = load_events(&args.input)?;
    if config.sort_input && !args.no_sort {
        sort_by_creation_time(&mut events);
    }

    let policy = if args.skip_invalid {
        BuildPolicy::Skip
    } else {
        config.build_policy
    };

    let mut tree = ProcessTree::new().with_policy(policy);
    let report = tree.build_tree(&events)?;
    if report.skipped > 0 {
        warn!(
            skipped = report.skipped,
            records = report.records,
            "some records were skipped"
        );
    }

    render(&tree, args)
}

pub fn render(tree: &ProcessTree, args: &BuildArgs) -> ProcessTreeResult<String> {
    match args.format {
        OutputFormat::Dependentree => {
            let mut entries = tree.export();
            if args.start.is_some() || args.end.is_some() {
                entries = filter_by_time_window(&entries, args.start, args.end);
            }
            Ok(serde_json::to_string_pretty(&entries)?)
        }
        OutputFormat::Display => Ok(tree.display()),
        OutputFormat::Pids => Ok(tree
            .get_all_pids()
            .iter()
            .map(i64::to_string)
            .collect::<Vec<_>>()
            .join("\n")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn event(id: i64, filename: &str, created: i64) -> Value {
        json!({
            "TargetProcessId": id,
            "TargetProcessFilename": filename,
            "TargetProcessCreationTime": created
        })
    }

    #[test]
    fn parses_json_array_and_ndjson_alike() {
        let array = parse_events(r#"[{"a": 1}, {"a": 2}]"#).expect("array");
        let ndjson = parse_events("{\"a\": 1}\n\n{\"a\": 2}\n").expect("ndjson");
        assert_eq!(array, ndjson);
        assert_eq!(array.len(), 2);
        assert!(parse_events("").expect("empty").is_empty());
    }

    #[test]
    fn malformed_input_is_a_json_error() {
        let err = parse_events("{\"a\": 1}\n{oops").expect_err("broken line");
        assert_eq!(err.category(), crate::error::ErrorCategory::Input);
    }

    #[test]
    fn sorting_is_stable_and_puts_unusable_records_first() {
        let mut events = vec![
            event(2, "b", 20),
            event(1, "a", 10),
            json!({"TargetProcessFilename": "broken"}),
            event(3, "c", 10),
        ];
        sort_by_creation_time(&mut events);

        let order: Vec<Value> = events
            .iter()
            .map(|value| value["TargetProcessFilename"].clone())
            .collect();
        assert_eq!(order, vec![json!("broken"), json!("a"), json!("c"), json!("b")]);
    }

    #[test]
    fn load_events_reads_files_and_names_missing_ones() {
        let dir = tempfile::TempDir::new().expect("temp dir");
        let path = dir.path().join("events.ndjson");
        let content = format!("{}\n{}\n", event(1, "a", 10), event(2, "b", 20));
        std::fs::write(&path, content).expect("write events");

        let events = load_events(&path).expect("load");
        assert_eq!(events, vec![event(1, "a", 10), event(2, "b", 20)]);

        let missing = dir.path().join("absent.json");
        let err = load_events(&missing).expect_err("no such file");
        assert_eq!(err.category(), crate::error::ErrorCategory::Filesystem);
        assert!(err.user_message().contains("absent.json"));
    }
}
