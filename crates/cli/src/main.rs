// CaseGrid CLI - headless validation-error tracking for case grids

mod exit_codes;
mod logger;
mod rules;

use std::cell::Cell;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::rc::Rc;
use std::sync::Arc;
use std::time::Duration;

use clap::{ArgAction, Parser, Subcommand, ValueEnum};

use casegrid_config::Settings;
use casegrid_core::ColumnType;
use casegrid_engine::bulk::BulkCallbacks;
use casegrid_engine::error_store::ErrorStore;
use casegrid_engine::row_ops::{handle_row_deletion, handle_row_insertion, RowDeletion};
use casegrid_engine::{
    compute_unique_key, EngineOptions, ErrorKey, ErrorMap, GridState, GroupId, ValidationEngine,
};

use exit_codes::{EXIT_ERROR, EXIT_INVALID_DATA, EXIT_IO, EXIT_PARSE, EXIT_SUCCESS, EXIT_USAGE};
use rules::DefaultRules;

#[derive(Parser)]
#[command(name = "casegrid")]
#[command(about = "Validation-error tracking for epidemiological case grids (headless)")]
#[command(long_version = long_version())]
#[command(version)]
#[command(subcommand_required = false)]
struct Cli {
    /// More log output on stderr (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    /// Settings file (default: the user config directory)
    #[arg(long, global = true, env = "CASEGRID_CONFIG", value_name = "PATH")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate every cell of a grid and print the resulting error map
    #[command(after_help = "\
Examples:
  casegrid validate grid.json
  casegrid validate grid.json --format text --visible-only
  casegrid validate grid.json --strict-exit || echo \"grid has invalid cells\"

Exit codes:
  0  No invalid cells (or --strict-exit not given)
  5  Invalid cells found and --strict-exit given")]
    Validate {
        /// Grid state JSON (rows, columns, optional filter)
        grid: PathBuf,

        /// Write the error map here instead of stdout
        #[arg(long, short = 'o')]
        output: Option<PathBuf>,

        #[arg(long, value_enum, default_value = "json")]
        format: OutputFormat,

        /// Only errors on rows inside the grid's filter, keyed by display row
        #[arg(long)]
        visible_only: bool,

        /// Exit 5 when any cell is invalid
        #[arg(long)]
        strict_exit: bool,

        /// Run the bulk pass on a background thread
        #[arg(long)]
        worker: bool,
    },

    /// Carry a persisted error map across a column insertion or deletion
    #[command(after_help = "\
Edit specs name a repeating group and the member positions:
  clinical@1          clinical columns inserted at position 1 (with --inserted)
  diet:lunch@0,2      diet members 0 and 2 of section \"lunch\" deleted (with --deleted)

Without an edit spec, edits are assumed to happen at the end of each group.")]
    Remap {
        /// Grid state before the edit
        #[arg(long)]
        before: PathBuf,

        /// Grid state after the edit
        #[arg(long)]
        after: PathBuf,

        /// Error map recorded against the `before` grid
        #[arg(long)]
        errors: PathBuf,

        /// Group and position of inserted columns
        #[arg(long, value_name = "KIND[:GROUP]@POS", conflicts_with = "deleted")]
        inserted: Option<String>,

        /// Group and member positions of deleted columns
        #[arg(long, value_name = "KIND[:GROUP]@I,J,..")]
        deleted: Option<String>,

        #[arg(long, short = 'o')]
        output: Option<PathBuf>,

        #[arg(long, value_enum, default_value = "json")]
        format: OutputFormat,
    },

    /// Shift a persisted error map for inserted or deleted rows
    Rows {
        /// Error map to shift
        #[arg(long)]
        errors: PathBuf,

        /// Rows inserted at START
        #[arg(long, value_name = "START:COUNT", conflicts_with = "delete")]
        insert: Option<String>,

        /// Deleted row indices
        #[arg(long, value_name = "ROWS", value_delimiter = ',')]
        delete: Vec<usize>,

        #[arg(long, short = 'o')]
        output: Option<PathBuf>,
    },

    /// List a grid's columns with their durable keys
    Schema {
        /// Grid state JSON
        grid: PathBuf,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Json,
    Text,
}

fn long_version() -> &'static str {
    concat!(
        env!("CARGO_PKG_VERSION"),
        " (", env!("CASEGRID_COMMIT"), ")",
        "\nengine:  casegrid-engine ", env!("CARGO_PKG_VERSION"),
        "\ntarget:  ", env!("CASEGRID_TARGET"),
    )
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let settings = load_settings(cli.config.as_deref());
    let level = logger::level_for(cli.verbose, settings.log_level.to_level_filter());
    if let Err(e) = logger::init(level) {
        eprintln!("warning: logger not installed: {}", e);
    }

    let result = match cli.command {
        None => {
            // No subcommand = show help
            eprintln!("Usage: casegrid <command> [options]");
            eprintln!("       casegrid --help for more information");
            Ok(())
        }
        Some(Commands::Validate { grid, output, format, visible_only, strict_exit, worker }) => {
            cmd_validate(&settings, grid, output, format, visible_only, strict_exit, worker)
        }
        Some(Commands::Remap { before, after, errors, inserted, deleted, output, format }) => {
            cmd_remap(&settings, before, after, errors, inserted, deleted, output, format)
        }
        Some(Commands::Rows { errors, insert, delete, output }) => cmd_rows(errors, insert, delete, output),
        Some(Commands::Schema { grid, json }) => cmd_schema(grid, json),
    };

    match result {
        Ok(()) => ExitCode::from(EXIT_SUCCESS),
        Err(CliError { code, message, hint }) => {
            if !message.is_empty() {
                eprintln!("error: {}", message);
            }
            if let Some(hint) = hint {
                eprintln!("hint:  {}", hint);
            }
            ExitCode::from(code)
        }
    }
}

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug)]
pub struct CliError {
    pub code: u8,
    pub message: String,
    pub hint: Option<String>,
}

impl CliError {
    pub fn args(msg: impl Into<String>) -> Self {
        Self { code: EXIT_USAGE, message: msg.into(), hint: None }
    }

    pub fn io(msg: impl Into<String>) -> Self {
        Self { code: EXIT_IO, message: msg.into(), hint: None }
    }

    pub fn parse(msg: impl Into<String>) -> Self {
        Self { code: EXIT_PARSE, message: msg.into(), hint: None }
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self { code: EXIT_ERROR, message: msg.into(), hint: None }
    }

    /// Add a hint to an existing error.
    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }
}

// ============================================================================
// Settings and I/O helpers
// ============================================================================

/// An explicit path that does not exist yet means defaults, without creating it.
fn load_settings(path: Option<&Path>) -> Settings {
    match path {
        Some(p) if p.exists() => Settings::load_from(p),
        Some(_) => Settings::default(),
        None => Settings::load(),
    }
}

fn engine_options(settings: &Settings, worker: bool) -> EngineOptions {
    EngineOptions {
        debounce: Duration::from_millis(settings.debounce_ms),
        history_limit: settings.history_max_entries,
        use_worker: settings.use_worker || worker,
        chunk_size: settings.bulk_chunk_size.max(1),
    }
}

fn read_file(path: &Path) -> Result<String, CliError> {
    fs::read_to_string(path).map_err(|e| CliError::io(format!("{}: {}", path.display(), e)))
}

fn read_grid(path: &Path) -> Result<GridState, CliError> {
    let text = read_file(path)?;
    serde_json::from_str(&text).map_err(|e| {
        CliError::parse(format!("{}: {}", path.display(), e))
            .with_hint("expected an object with \"rows\" and \"columns\"")
    })
}

fn read_errors(path: &Path) -> Result<ErrorStore, CliError> {
    let text = read_file(path)?;
    ErrorStore::from_json(&text).map_err(|e| CliError::parse(format!("{}: {}", path.display(), e)))
}

fn render_errors(map: &ErrorMap, format: OutputFormat) -> Result<String, CliError> {
    match format {
        OutputFormat::Json => serde_json::to_string_pretty(map)
            .map(|mut s| {
                s.push('\n');
                s
            })
            .map_err(|e| CliError::internal(e.to_string())),
        OutputFormat::Text => {
            let mut out = String::new();
            for (raw, record) in map {
                match raw.parse::<ErrorKey>() {
                    Ok(key) => out.push_str(&format!("{}\t{}\t{}\n", key.row, key.column, record.message)),
                    Err(_) => out.push_str(&format!("{}\t{}\n", raw, record.message)),
                }
            }
            Ok(out)
        }
    }
}

fn emit(text: &str, output: Option<&Path>) -> Result<(), CliError> {
    match output {
        Some(path) => fs::write(path, text).map_err(|e| CliError::io(format!("{}: {}", path.display(), e))),
        None => {
            let mut stdout = io::stdout().lock();
            stdout
                .write_all(text.as_bytes())
                .and_then(|_| stdout.flush())
                .map_err(|e| CliError::io(e.to_string()))
        }
    }
}

// ============================================================================
// validate
// ============================================================================

fn cmd_validate(
    settings: &Settings,
    grid_path: PathBuf,
    output: Option<PathBuf>,
    format: OutputFormat,
    visible_only: bool,
    strict_exit: bool,
    worker: bool,
) -> Result<(), CliError> {
    let grid = read_grid(&grid_path)?;
    let mut engine = ValidationEngine::new(
        Arc::new(DefaultRules),
        grid.columns.clone(),
        engine_options(settings, worker),
    );
    engine.apply_filter(grid.filter.to_view());

    let failures = Rc::new(Cell::new(0usize));
    let failure_count = failures.clone();
    let callbacks = BulkCallbacks::new()
        .on_progress(|done, total| log::debug!("validated {}/{} cells", done, total))
        .on_error(move |failure| {
            failure_count.set(failure_count.get() + 1);
            log::warn!("row {} column {}: {}", failure.row, failure.col, failure.error);
        });
    engine.revalidate_all(&grid, callbacks);
    engine.wait_bulk();

    let errors = if visible_only { engine.get_visible_errors() } else { engine.export_errors() };
    emit(&render_errors(&errors, format)?, output.as_deref())?;

    if failures.get() > 0 {
        log::warn!("{} cell(s) could not be evaluated", failures.get());
    }
    if strict_exit && !errors.is_empty() {
        return Err(CliError {
            code: EXIT_INVALID_DATA,
            message: format!("{} invalid cell(s)", errors.len()),
            hint: None,
        });
    }
    Ok(())
}

// ============================================================================
// remap
// ============================================================================

/// Column edit named on the command line.
#[derive(Debug, PartialEq, Eq)]
enum EditSpec {
    Inserted { group: GroupId, position: usize },
    Deleted { group: GroupId, cell_indices: Vec<usize> },
}

/// Split `KIND[:GROUP]@REST` into the group and `REST`.
fn parse_group(spec: &str) -> Result<(GroupId, &str), CliError> {
    let (head, rest) = spec
        .split_once('@')
        .ok_or_else(|| CliError::args(format!("'{}': missing '@'", spec)).with_hint("e.g. clinical@1"))?;
    let (kind, section) = match head.split_once(':') {
        Some((kind, section)) => (kind, Some(section)),
        None => (head, None),
    };
    let column_type = ColumnType::parse(kind)
        .ok_or_else(|| CliError::args(format!("unknown column type '{}'", kind)))?;
    if !column_type.is_array_group() {
        return Err(CliError::args(format!("'{}' is not a repeating group", kind))
            .with_hint("only basic, clinical and diet columns can be inserted or deleted"));
    }
    let mut group = GroupId::new(column_type);
    if let Some(section) = section.filter(|s| !s.is_empty()) {
        group = group.with_group(section);
    }
    Ok((group, rest))
}

fn parse_index(s: &str, spec: &str) -> Result<usize, CliError> {
    s.trim()
        .parse()
        .map_err(|_| CliError::args(format!("'{}': '{}' is not a column position", spec, s)))
}

fn parse_edit(inserted: Option<&str>, deleted: Option<&str>) -> Result<Option<EditSpec>, CliError> {
    if let Some(spec) = inserted {
        let (group, rest) = parse_group(spec)?;
        let position = parse_index(rest, spec)?;
        return Ok(Some(EditSpec::Inserted { group, position }));
    }
    if let Some(spec) = deleted {
        let (group, rest) = parse_group(spec)?;
        let cell_indices = rest
            .split(',')
            .map(|s| parse_index(s, spec))
            .collect::<Result<Vec<_>, _>>()?;
        return Ok(Some(EditSpec::Deleted { group, cell_indices }));
    }
    Ok(None)
}

#[allow(clippy::too_many_arguments)]
fn cmd_remap(
    settings: &Settings,
    before_path: PathBuf,
    after_path: PathBuf,
    errors_path: PathBuf,
    inserted: Option<String>,
    deleted: Option<String>,
    output: Option<PathBuf>,
    format: OutputFormat,
) -> Result<(), CliError> {
    let edit = parse_edit(inserted.as_deref(), deleted.as_deref())?;
    let before = read_grid(&before_path)?;
    let after = read_grid(&after_path)?;

    let mut engine = ValidationEngine::new(
        Arc::new(DefaultRules),
        before.columns.clone(),
        engine_options(settings, false),
    );
    let errors_json = read_file(&errors_path)?;
    engine
        .load_errors_json(&errors_json)
        .map_err(|e| CliError::parse(format!("{}: {}", errors_path.display(), e)))?;

    engine.update_column_schema(after.columns.clone());
    let stats = match edit {
        Some(EditSpec::Inserted { group, position }) => engine.handle_column_addition(group, position, &after),
        Some(EditSpec::Deleted { group, cell_indices }) => {
            engine.handle_column_deletion(group, &cell_indices, &after)
        }
        None => engine.handle_schema_change(&after),
    };
    log::info!("remap: {} kept, {} moved, {} dropped", stats.kept, stats.moved, stats.dropped);

    emit(&render_errors(&engine.export_errors(), format)?, output.as_deref())
}

// ============================================================================
// rows
// ============================================================================

fn parse_insert(spec: &str) -> Result<(usize, usize), CliError> {
    let invalid = || CliError::args(format!("'{}': expected START:COUNT", spec));
    let (start, count) = spec.split_once(':').ok_or_else(invalid)?;
    let start = start.trim().parse().map_err(|_| invalid())?;
    let count = count.trim().parse().map_err(|_| invalid())?;
    Ok((start, count))
}

fn cmd_rows(
    errors_path: PathBuf,
    insert: Option<String>,
    delete: Vec<usize>,
    output: Option<PathBuf>,
) -> Result<(), CliError> {
    let mut store = read_errors(&errors_path)?;
    match insert {
        Some(spec) => {
            let (start, count) = parse_insert(&spec)?;
            handle_row_insertion(&mut store, start, count);
        }
        None if !delete.is_empty() => handle_row_deletion(&mut store, &RowDeletion::new(&delete)),
        None => {
            return Err(CliError::args("nothing to do").with_hint("pass --insert START:COUNT or --delete ROWS"));
        }
    }
    emit(&render_errors(&store.snapshot(), OutputFormat::Json)?, output.as_deref())
}

// ============================================================================
// schema
// ============================================================================

fn cmd_schema(grid_path: PathBuf, json: bool) -> Result<(), CliError> {
    let grid = read_grid(&grid_path)?;
    let schema = grid.schema();

    if json {
        let columns: Vec<serde_json::Value> = schema
            .columns()
            .iter()
            .enumerate()
            .map(|(pos, col)| {
                serde_json::json!({
                    "position": pos,
                    "uniqueKey": compute_unique_key(col).as_str(),
                    "type": col.column_type.as_str(),
                    "dataKey": col.data_key,
                    "cellIndex": col.cell_index,
                    "group": col.group,
                    "isEditable": col.is_editable,
                })
            })
            .collect();
        let text = serde_json::to_string_pretty(&columns).map_err(|e| CliError::internal(e.to_string()))?;
        return emit(&format!("{}\n", text), None);
    }

    let mut out = String::new();
    for (pos, col) in schema.columns().iter().enumerate() {
        let lock = if col.is_editable { "" } else { "  (read-only)" };
        out.push_str(&format!("{:>4}  {:<24} {}{}\n", pos, compute_unique_key(col), col.column_type, lock));
    }
    emit(&out, None)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_inserted_spec() {
        let edit = parse_edit(Some("clinical@2"), None).unwrap();
        assert_eq!(
            edit,
            Some(EditSpec::Inserted { group: GroupId::new(ColumnType::Clinical), position: 2 })
        );
    }

    #[test]
    fn test_parse_deleted_spec_with_section() {
        let edit = parse_edit(None, Some("diet:lunch@0, 3")).unwrap();
        assert_eq!(
            edit,
            Some(EditSpec::Deleted {
                group: GroupId::new(ColumnType::Diet).with_group("lunch"),
                cell_indices: vec![0, 3],
            })
        );
    }

    #[test]
    fn test_parse_edit_rejects_singletons_and_garbage() {
        assert_eq!(parse_edit(Some("isPatient@0"), None).unwrap_err().code, EXIT_USAGE);
        assert_eq!(parse_edit(Some("clinical"), None).unwrap_err().code, EXIT_USAGE);
        assert_eq!(parse_edit(Some("bogus@1"), None).unwrap_err().code, EXIT_USAGE);
        assert_eq!(parse_edit(None, Some("diet@1,x")).unwrap_err().code, EXIT_USAGE);
        assert_eq!(parse_edit(None, None).unwrap(), None);
    }

    #[test]
    fn test_parse_insert_rows() {
        assert_eq!(parse_insert("3:2").unwrap(), (3, 2));
        assert!(parse_insert("3").is_err());
        assert!(parse_insert("a:1").is_err());
    }

    #[test]
    fn test_engine_options_from_settings() {
        let settings = Settings { debounce_ms: 50, bulk_chunk_size: 0, ..Settings::default() };
        let options = engine_options(&settings, true);
        assert_eq!(options.debounce, Duration::from_millis(50));
        assert_eq!(options.chunk_size, 1);
        assert!(options.use_worker);
    }

    #[test]
    fn test_text_rendering() {
        let mut map = ErrorMap::new();
        map.insert(
            "2_isPatient".to_string(),
            casegrid_engine::ErrorRecord { message: "bad".to_string(), timestamp: 0 },
        );
        let text = render_errors(&map, OutputFormat::Text).unwrap();
        assert_eq!(text, "2\tisPatient\tbad\n");
    }
}
