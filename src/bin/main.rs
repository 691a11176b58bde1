//! relquery CLI - parse DSL text and compile requests to MySQL
//!
//! Usage:
//!   relquery parse <dsl>
//!   relquery compile --schema <schema.toml> --entity <name> [--fields <dsl|json>]
//!                    [--filter <dsl|json>] [--limit <n>] [--skip <n>] [--orderby <a,-b>]
//!
//! Examples:
//!   relquery parse "and(name.like(Paul),age.gt(10))"
//!   relquery compile --schema blog.toml --entity users \
//!       --fields "name, posts.fields(title).limit(3)" --filter "age.gt(10)"

use clap::{Parser, Subcommand, ValueEnum};
use relquery::compiler::Compiler;
use relquery::config::Settings;
use relquery::error::QueryError;
use relquery::request::{Filter, Projection, Request};
use relquery::schema::SchemaConfig;
use relquery::{dsl, logging};
use serde_json::{json, Value};
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser)]
#[command(name = "relquery")]
#[command(about = "relquery - compile document-style queries to MySQL")]
#[command(version)]
struct Cli {
    /// Settings file (defaults to $RELQUERY_CONFIG or ./relquery.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Parse DSL text and print the JSON tree
    Parse {
        /// DSL text, e.g. "and(name.like(Paul),age.gt(10))"
        text: String,
    },

    /// Compile a request against a schema file
    Compile {
        /// Path to the schema TOML file (defaults to [schema].path)
        #[arg(short, long)]
        schema: Option<PathBuf>,

        /// Entity to select from
        #[arg(short, long)]
        entity: String,

        /// Projection as DSL text or a JSON object
        #[arg(long)]
        fields: Option<String>,

        /// Filter as DSL text or a JSON object
        #[arg(long)]
        filter: Option<String>,

        #[arg(long)]
        limit: Option<u64>,

        #[arg(long)]
        skip: Option<u64>,

        /// Comma-separated order terms; a leading '-' sorts descending
        #[arg(long)]
        orderby: Option<String>,

        /// Output format
        #[arg(short, long, default_value = "sql")]
        output: OutputFormat,
    },
}

#[derive(Clone, ValueEnum)]
enum OutputFormat {
    /// SELECT, COUNT and parameters as commented SQL
    Sql,
    /// Statements and alias table as JSON
    Json,
}

struct CompileArgs {
    schema: Option<PathBuf>,
    entity: String,
    fields: Option<String>,
    filter: Option<String>,
    limit: Option<u64>,
    skip: Option<u64>,
    orderby: Option<String>,
    output: OutputFormat,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let settings = match &cli.config {
        Some(path) => Settings::from_file(path),
        None => Settings::load(),
    };
    let settings = match settings {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Error loading settings: {}", e);
            return ExitCode::FAILURE;
        }
    };
    logging::init(&settings.logging.filter);

    match cli.command {
        Commands::Parse { text } => cmd_parse(&text),
        Commands::Compile {
            schema,
            entity,
            fields,
            filter,
            limit,
            skip,
            orderby,
            output,
        } => cmd_compile(
            &settings,
            CompileArgs {
                schema,
                entity,
                fields,
                filter,
                limit,
                skip,
                orderby,
                output,
            },
        ),
    }
}

fn cmd_parse(text: &str) -> ExitCode {
    match dsl::parse(text) {
        Ok(tree) => {
            println!("{}", pretty(&tree));
            ExitCode::SUCCESS
        }
        Err(e) => {
            report(&e);
            ExitCode::FAILURE
        }
    }
}

fn cmd_compile(settings: &Settings, args: CompileArgs) -> ExitCode {
    let schema_path = match args.schema {
        Some(path) => path,
        None => match settings.schema.resolved_path() {
            Ok(Some(path)) => path,
            Ok(None) => {
                eprintln!("No schema file: pass --schema or set [schema].path");
                return ExitCode::FAILURE;
            }
            Err(e) => {
                eprintln!("Error resolving schema path: {}", e);
                return ExitCode::FAILURE;
            }
        },
    };

    let schema = match SchemaConfig::from_file(&schema_path).and_then(SchemaConfig::build) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Error loading schema '{}': {}", schema_path.display(), e);
            return ExitCode::FAILURE;
        }
    };

    let mut request = match build_request(args.fields.as_deref(), args.filter.as_deref()) {
        Ok(r) => r,
        Err(e) => {
            report(&e);
            return ExitCode::FAILURE;
        }
    };
    if args.limit.is_some() {
        request.options.limit = args.limit;
    }
    if args.skip.is_some() {
        request.options.skip = args.skip;
    }
    if let Some(terms) = &args.orderby {
        request.options.orderby = Some(
            terms
                .split(',')
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .map(String::from)
                .collect(),
        );
    }

    let entity = match schema.lookup(&args.entity) {
        Ok(id) => id,
        Err(e) => {
            eprintln!("{}", e);
            return ExitCode::FAILURE;
        }
    };

    let compiled = match Compiler::new(&schema, &settings.compiler).compile(entity, &request) {
        Ok(c) => c,
        Err(e) => {
            report(&e);
            return ExitCode::FAILURE;
        }
    };

    match args.output {
        OutputFormat::Sql => {
            println!("-- select");
            println!("{};", compiled.select.sql);
            println!("-- params: {}", Value::Array(compiled.select.params.clone()));
            println!();
            println!("-- count");
            println!("{};", compiled.count.sql);
            println!("-- params: {}", Value::Array(compiled.count.params.clone()));
        }
        OutputFormat::Json => {
            let aliases: Vec<Value> = compiled
                .aliases
                .entries()
                .iter()
                .map(|entry| json!({"alias": entry.alias, "path": entry.path}))
                .collect();
            println!(
                "{}",
                pretty(&json!({
                    "select": {"sql": compiled.select.sql, "params": compiled.select.params},
                    "count": {"sql": compiled.count.sql, "params": compiled.count.params},
                    "aliases": aliases,
                }))
            );
        }
    }
    ExitCode::SUCCESS
}

/// Text starting with `{` is JSON, anything else DSL.
fn build_request(fields: Option<&str>, filter: Option<&str>) -> Result<Request, QueryError> {
    let is_json = |text: &Option<&str>| text.is_some_and(|t| t.trim_start().starts_with('{'));
    if !is_json(&fields) && !is_json(&filter) {
        return Request::from_dsl(fields, filter);
    }

    let mut request = Request::default();
    if let Some(text) = fields {
        if is_json(&Some(text)) {
            request.fields = Projection::from_value(&parse_json(text)?)?;
        } else {
            request = Request::from_dsl(Some(text), None)?;
        }
    }
    if let Some(text) = filter {
        let tree = if is_json(&Some(text)) {
            parse_json(text)?
        } else {
            dsl::parse(text)?
        };
        request.filter = Some(Filter::from_value(&tree)?);
    }
    Ok(request)
}

fn parse_json(text: &str) -> Result<Value, QueryError> {
    serde_json::from_str(text).map_err(|e| QueryError::invalid_argument(format!("invalid JSON: {}", e)))
}

fn pretty(value: &Value) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
}

fn report(error: &QueryError) {
    eprintln!("Error ({}): {}", error.kind(), error);
    if let Some(fields) = error.field_errors() {
        for (field, reason) in fields.iter() {
            eprintln!("  {}: {}", field, reason);
        }
    }
}
