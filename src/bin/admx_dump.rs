use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process::exit;

use admx::{
    AdmxError, Category, ClassFilter, DEFAULT_LOCALE, FsTemplateSource, PolicyClass,
    PolicyDefinition, ScanSettings, TemplateStore,
};
use anyhow::{Context, Result, bail, format_err};
use clap::{Arg, ArgAction, ArgMatches, Command};
use dialoguer::Confirm;
use indoc::indoc;
use log::{Level, LevelFilter};
use serde_json::json;
use simplelog::{Config, WriteLogger};

#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum OutputFormat {
    Json,
    Jsonl,
    Text,
}

#[derive(Clone, Debug)]
enum Query {
    Categories,
    Policies {
        filter: ClassFilter,
        find: Option<String>,
    },
}

struct AdmxDump {
    source: FsTemplateSource,
    settings: ScanSettings,
    query: Query,
    output_format: OutputFormat,
    output: Box<dyn Write>,
    verbosity_level: Option<Level>,
}

impl AdmxDump {
    pub fn from_cli_matches(matches: &ArgMatches) -> Result<Self> {
        let source = match (
            matches.get_one::<PathBuf>("store"),
            matches.get_one::<String>("domain"),
        ) {
            (Some(store), _) => FsTemplateSource::new(store),
            (None, Some(domain)) => FsTemplateSource::central(domain),
            (None, None) => FsTemplateSource::local(),
        };

        let output_format = match matches
            .get_one::<String>("output-format")
            .map(String::as_str)
        {
            Some("json") => OutputFormat::Json,
            Some("jsonl") => OutputFormat::Jsonl,
            _ => OutputFormat::Text,
        };

        let num_threads = matches
            .get_one::<usize>("num-threads")
            .copied()
            .unwrap_or(0);
        let num_threads = match (cfg!(feature = "multithreading"), num_threads) {
            (true, number) => number,
            (false, number) if number <= 1 => 1,
            (false, _) => {
                eprintln!(
                    "turned on threads, but library was compiled without `multithreading` feature! using fallback sync iterator"
                );
                1
            }
        };

        let settings = ScanSettings::new()
            .locale(
                matches
                    .get_one::<String>("locale")
                    .map(String::as_str)
                    .unwrap_or(DEFAULT_LOCALE),
            )
            .fallback_locale(matches.get_one::<String>("fallback-locale").cloned())
            .num_threads(num_threads)
            .report_category_collisions(matches.get_flag("report-collisions"));

        let query = match matches.subcommand() {
            Some(("categories", _)) => Query::Categories,
            Some(("policies", sub)) => Query::Policies {
                filter: ClassFilter::from(sub.get_one::<PolicyClass>("class").copied()),
                find: sub.get_one::<String>("find").cloned(),
            },
            _ => bail!("a subcommand is required"),
        };

        let verbosity_level = match matches.get_count("verbose") {
            0 => None,
            1 => Some(Level::Info),
            2 => Some(Level::Debug),
            3 => Some(Level::Trace),
            _ => {
                eprintln!("using more than  -vvv does not affect verbosity level");
                Some(Level::Trace)
            }
        };

        let output: Box<dyn Write> = match matches.get_one::<PathBuf>("output-target") {
            Some(path) => Box::new(Self::create_output_file(
                path,
                !matches.get_flag("no-confirm-overwrite"),
            )?),
            None => Box::new(io::stdout()),
        };

        Ok(AdmxDump {
            source,
            settings,
            query,
            output_format,
            output,
            verbosity_level,
        })
    }

    /// Main entry point for `AdmxDump`
    pub fn run(&mut self) -> Result<()> {
        self.try_to_initialize_logging();

        let store = match TemplateStore::load(&self.source, self.settings.clone()) {
            Ok(store) => store,
            Err(e) if e.is_fatal() => {
                eprintln!("{}", e);
                exit(2)
            }
            Err(e) => return Err(e.into()),
        };

        report_problems(store.problems());

        match self.query.clone() {
            Query::Categories => {
                let categories = store.categories();
                let records: Vec<serde_json::Value> = categories
                    .iter()
                    .map(|category| category_json(&store, category))
                    .collect();
                let lines: Vec<String> = categories
                    .iter()
                    .map(|category| category_line(&store, category))
                    .collect();
                self.write_records(&records, &lines)
            }
            Query::Policies { filter, find } => {
                let extraction = match find {
                    Some(name) => {
                        let mut extraction = store.find_policies(&name);
                        extraction.records.retain(|p| filter.matches(p.class));
                        extraction
                    }
                    None => store.policies(filter),
                };
                report_problems(&extraction.problems);

                let records: Vec<serde_json::Value> = extraction
                    .records
                    .iter()
                    .map(|policy| policy_json(&store, policy))
                    .collect();
                let lines: Vec<String> = extraction
                    .records
                    .iter()
                    .map(|policy| policy_line(&store, policy))
                    .collect();
                self.write_records(&records, &lines)
            }
        }
    }

    fn write_records(&mut self, records: &[serde_json::Value], lines: &[String]) -> Result<()> {
        match self.output_format {
            OutputFormat::Json => {
                let document = serde_json::to_string_pretty(records)?;
                writeln!(self.output, "{}", document)?;
            }
            OutputFormat::Jsonl => {
                for record in records {
                    writeln!(self.output, "{}", serde_json::to_string(record)?)?;
                }
            }
            OutputFormat::Text => {
                for line in lines {
                    writeln!(self.output, "{}", line)?;
                }
            }
        }

        self.output.flush().context("failed to flush output")
    }

    /// If `prompt` is passed, will display a confirmation prompt before overwriting files.
    fn create_output_file(path: impl AsRef<Path>, prompt: bool) -> Result<File> {
        let p = path.as_ref();

        if p.is_dir() {
            bail!(
                "There is a directory at {}, refusing to overwrite",
                p.display()
            );
        }

        if p.exists() {
            if prompt {
                let confirmed = Confirm::new()
                    .with_prompt(format!(
                        "Are you sure you want to override output file at {}",
                        p.display()
                    ))
                    .default(false)
                    .interact()
                    .context("Failed to write confirmation prompt to term")?;

                if !confirmed {
                    bail!("Cancelled");
                }
            }
            return File::create(p)
                .with_context(|| format!("failed to create output file `{}`", p.display()));
        }

        // Ok to assume p is not an existing directory
        match p.parent() {
            Some(parent) => {
                if !parent.as_os_str().is_empty() && !parent.exists() {
                    fs::create_dir_all(parent)?;
                }
                File::create(p)
                    .with_context(|| format!("failed to create output file `{}`", p.display()))
            }
            None => Err(format_err!("Output file cannot be root.")),
        }
    }

    fn try_to_initialize_logging(&self) {
        if let Some(level) = self.verbosity_level {
            if let Err(e) = WriteLogger::init(level.to_level_filter(), Config::default(), io::stderr())
            {
                eprintln!("Failed to initialize logging: {:?}", e);
            }
        } else {
            log::set_max_level(LevelFilter::Off);
        }
    }
}

fn report_problems(problems: &[AdmxError]) {
    for problem in problems {
        eprintln!("warning: {}", problem);
    }
}

fn category_json(store: &TemplateStore, category: &Category) -> serde_json::Value {
    json!({
        "id": category.id,
        "display_name": category.display_name,
        "parent": store.category_graph().parent_id(&category.id),
        "path": store.display_path(&category.id),
        "source": category.source,
    })
}

fn category_line(store: &TemplateStore, category: &Category) -> String {
    format!(
        "{}\t{}",
        category.id,
        store.display_path(&category.id).unwrap_or_default()
    )
}

fn policy_json(store: &TemplateStore, policy: &PolicyDefinition) -> serde_json::Value {
    json!({
        "name": policy.name,
        "class": policy.class,
        "display_name": policy.display_name,
        "path": store.policy_display_path(policy),
        "category": policy.category,
        "key": policy.key,
        "value_name": policy.value_name,
        "registry_paths": policy.registry_paths(),
        "source": policy.source,
    })
}

fn policy_line(store: &TemplateStore, policy: &PolicyDefinition) -> String {
    format!(
        "{}\t{}\t{}\t{}",
        store.policy_display_path(policy),
        policy.class,
        policy.key,
        policy.value_name.as_deref().unwrap_or("")
    )
}

fn class_filter_arg() -> Arg {
    Arg::new("class")
        .long("class")
        .short('c')
        .value_parser(|s: &str| s.parse::<PolicyClass>())
        .help("Only list policies of this class: machine, user or both. Machine and user include policies of class both.")
}

fn cli() -> Command {
    Command::new("admx_dump")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Utility to resolve Group Policy administrative templates (ADMX/ADML)")
        .long_about(indoc!(r#"
            Utility to resolve Group Policy administrative templates (ADMX/ADML).

            Reads every definition file of a template store, resolves categories across files,
            and prints categories or policies with their localized display path and the
            registry key and value they control.

            Defaults to the local store (%SystemRoot%\PolicyDefinitions).
        "#))
        .subcommand_required(true)
        .arg(
            Arg::new("store")
                .long("store")
                .short('s')
                .value_name("DIR")
                .value_parser(clap::value_parser!(PathBuf))
                .conflicts_with("domain")
                .help("Path of the template store (a PolicyDefinitions directory)."),
        )
        .arg(
            Arg::new("domain")
                .long("domain")
                .short('d')
                .value_name("DOMAIN")
                .help("Use the central store of this domain (\\\\<domain>\\SYSVOL\\<domain>\\Policies\\PolicyDefinitions)."),
        )
        .arg(
            Arg::new("locale")
                .long("locale")
                .short('l')
                .default_value(DEFAULT_LOCALE)
                .help("Locale of the resource files (ADML) to load."),
        )
        .arg(
            Arg::new("fallback-locale")
                .long("fallback-locale")
                .value_name("LOCALE")
                .help("Locale to load for templates that have no resources in --locale."),
        )
        .arg(
            Arg::new("num-threads")
                .long("threads")
                .short('t')
                .default_value("0")
                .value_parser(clap::value_parser!(usize))
                .help("Sets the number of worker threads, defaults to number of CPU cores."),
        )
        .arg(
            Arg::new("output-format")
                .long("format")
                .short('o')
                .value_parser(["json", "jsonl", "text"])
                .default_value("text")
                .help("Sets the output format")
                .long_help(indoc!(r#"
                    Sets the output format:
                        "text"  - one tab separated line per record.
                        "json"  - a single JSON array.
                        "jsonl" - one JSON object per line.
                "#)),
        )
        .arg(
            Arg::new("output-target")
                .long("output")
                .short('f')
                .value_name("FILE")
                .value_parser(clap::value_parser!(PathBuf))
                .help("Writes output to the file specified instead of stdout, problems will still be printed to stderr. \
                       Will ask for confirmation before overwriting files, to allow overwriting, pass `--no-confirm-overwrite`. \
                       Will create parent directories if needed."),
        )
        .arg(
            Arg::new("no-confirm-overwrite")
                .long("no-confirm-overwrite")
                .action(ArgAction::SetTrue)
                .help("When set, will not ask for confirmation before overwriting files, useful for automation"),
        )
        .arg(
            Arg::new("report-collisions")
                .long("report-collisions")
                .action(ArgAction::SetTrue)
                .help("Report categories that are redefined by another template instead of silently replacing them."),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .action(ArgAction::Count)
                .help("-v - info, -vv - debug, -vvv - trace."),
        )
        .subcommand(Command::new("categories").about("List all categories with their display path"))
        .subcommand(
            Command::new("policies")
                .about("List policies with their display path and registry location")
                .arg(class_filter_arg())
                .arg(
                    Arg::new("find")
                        .long("find")
                        .value_name("NAME")
                        .help("Only list policies whose display name, or full display path, matches NAME (case-insensitive)."),
                ),
        )
}

fn main() {
    let matches = cli().get_matches();

    let result = AdmxDump::from_cli_matches(&matches).and_then(|mut app| app.run());
    if let Err(e) = result {
        eprintln!("{:?}", e);
        exit(1);
    }
}
