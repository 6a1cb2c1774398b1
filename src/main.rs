//! Feedcheck CLI - product feed checker and fixer

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use colored::Colorize;
use feedcheck::config::{ColorMode, Config, OutputFormat};
use feedcheck::emit::Target;
use feedcheck::engine::Engine;
use feedcheck::fixer::{CanonicalField, DuplicatePolicy};
use feedcheck::output::{JsonFormatter, OutputFormatter, TextFormatter};
use feedcheck::registry::{SpecDefinition, SpecRegistry};
use feedcheck::selector::Selector;
use glob::glob;
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(
    name = "feedcheck",
    version,
    about = "Product feed checker and fixer",
    long_about = "Detects the marketplace format of XML product feeds (Google Merchant, Heureka, \
                  Compari, Skroutz, Ceneje, Ceneo), reports structural defects and re-emits \
                  feeds as Google RSS or Heureka XML."
)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Extra spec definition files (YAML or JSON)
    #[arg(long = "specs", global = true)]
    spec_files: Vec<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Disable colored output
    #[arg(long, global = true)]
    no_color: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Analyze one or more feeds
    Check {
        /// Files or glob patterns to check
        #[arg(required = true)]
        files: Vec<String>,

        /// Output format
        #[arg(short, long, value_enum)]
        format: Option<Format>,

        /// Analyze only the first N items of each feed
        #[arg(long)]
        sample: Option<usize>,

        /// Skip detection and check against this spec
        #[arg(long)]
        spec: Option<String>,

        /// Number of parallel jobs (0 = auto)
        #[arg(short, long)]
        jobs: Option<usize>,

        /// Rows shown per issue table
        #[arg(long)]
        limit: Option<usize>,

        /// Include extracted item records in JSON output
        #[arg(long)]
        items: bool,
    },
    /// Map a feed onto Google fields and re-emit it
    Fix {
        /// Feed to fix
        file: PathBuf,

        /// Output file (stdout when omitted)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Output vocabulary: google or heureka
        #[arg(short, long)]
        target: Option<Target>,

        /// Map a source tag onto a field, e.g. --map pic=image_link
        #[arg(long = "map", value_parser = parse_mapping)]
        mappings: Vec<(String, CanonicalField)>,

        /// Currency for prices that carry none
        #[arg(long)]
        currency: Option<String>,

        /// Channel title of Google output
        #[arg(long)]
        title: Option<String>,

        /// Emit items repeating an earlier id or link
        #[arg(long)]
        keep_duplicates: bool,

        /// Do not derive missing ids from links
        #[arg(long)]
        no_synthesize: bool,
    },
    /// List known specs in detection order
    Specs,
    /// Show the selectors and required fields of a spec
    Explain {
        /// Spec name (case-insensitive prefix match)
        spec: String,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum Format {
    Text,
    Json,
}

impl From<Format> for OutputFormat {
    fn from(format: Format) -> Self {
        match format {
            Format::Text => OutputFormat::Text,
            Format::Json => OutputFormat::Json,
        }
    }
}

fn parse_mapping(raw: &str) -> Result<(String, CanonicalField), String> {
    let (tag, field) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected TAG=FIELD, got '{}'", raw))?;
    let tag = tag.trim().to_lowercase();
    if tag.is_empty() {
        return Err(format!("empty tag in '{}'", raw));
    }
    Ok((tag, field.parse()?))
}

/// Expand glob patterns into existing files
fn expand_files(patterns: &[String]) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for pattern in patterns {
        let paths = glob(pattern).with_context(|| format!("invalid pattern '{}'", pattern))?;
        let before = files.len();
        for entry in paths.flatten() {
            if entry.is_file() {
                files.push(entry);
            }
        }
        // Keep literal paths so unreadable files are reported, not skipped
        if files.len() == before && !pattern.contains(['*', '?', '[']) {
            files.push(PathBuf::from(pattern));
        }
    }
    Ok(files)
}

fn load_config(cli: &Cli) -> Result<Config> {
    let mut config = match &cli.config {
        Some(path) => Config::load(path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => Config::load_default().context("failed to load config")?,
    };
    config.specs.files.extend(cli.spec_files.iter().cloned());
    if cli.no_color {
        config.output.color = ColorMode::Never;
    }
    Ok(config)
}

fn apply_color(mode: ColorMode) {
    match mode {
        ColorMode::Always => colored::control::set_override(true),
        ColorMode::Never => colored::control::set_override(false),
        ColorMode::Auto => {}
    }
}

fn find_spec<'r>(registry: &'r SpecRegistry, name: &str) -> Option<&'r SpecDefinition> {
    registry.get(name).or_else(|| {
        let wanted = name.to_lowercase();
        registry
            .iter()
            .find(|s| s.name.to_lowercase().starts_with(&wanted))
    })
}

fn selectors(list: &[Selector]) -> String {
    if list.is_empty() {
        return "-".dimmed().to_string();
    }
    list.iter()
        .map(|s| s.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

#[allow(clippy::too_many_arguments)]
fn run_check(
    cli: &Cli,
    files: &[String],
    format: Option<Format>,
    sample: Option<usize>,
    spec: Option<&str>,
    jobs: Option<usize>,
    limit: Option<usize>,
    items: bool,
) -> Result<i32> {
    let mut config = load_config(cli)?;
    config.merge_cli(
        format.map(OutputFormat::from),
        cli.verbose.then_some(true),
        jobs,
        sample,
        None,
    );
    if let Some(limit) = limit {
        config.output.show_limit = limit;
    }
    apply_color(config.output.color);

    let files = expand_files(files)?;
    if files.is_empty() {
        bail!("no files found to check");
    }

    let registry = config.registry()?;
    let output_format = config.output.format;
    let show_limit = config.output.show_limit;
    let verbose = config.output.verbose;
    let mut engine = Engine::new(config, registry);
    if let Some(name) = spec {
        let resolved = find_spec(engine.registry(), name)
            .map(|s| s.name.clone())
            .unwrap_or_else(|| name.to_string());
        engine = engine.with_spec(&resolved)?;
    }

    if verbose {
        eprintln!("Checking {} file(s)...", files.len());
    }
    let result = engine.check(&files);

    let formatter: Box<dyn OutputFormatter> = match output_format {
        OutputFormat::Text => Box::new(
            TextFormatter::new()
                .with_limit(show_limit)
                .verbose(verbose),
        ),
        OutputFormat::Json => {
            let json = JsonFormatter::new().pretty();
            Box::new(if items { json.with_items() } else { json })
        }
    };
    print!("{}", formatter.format(&result));
    if output_format == OutputFormat::Json {
        println!();
    }

    Ok(result.exit_code())
}

#[allow(clippy::too_many_arguments)]
fn run_fix(
    cli: &Cli,
    file: &Path,
    output: Option<&Path>,
    target: Option<Target>,
    mappings: &[(String, CanonicalField)],
    currency: Option<&str>,
    title: Option<&str>,
    keep_duplicates: bool,
    no_synthesize: bool,
) -> Result<i32> {
    let mut config = load_config(cli)?;
    apply_color(config.output.color);
    if let Some(target) = target {
        config.fixer.target = target;
    }
    if let Some(currency) = currency {
        config.fixer.default_currency = currency.to_string();
    }
    if let Some(title) = title {
        config.fixer.shop_title = title.to_string();
    }
    if keep_duplicates {
        config.fixer.duplicates = DuplicatePolicy::KeepAll;
    }
    if no_synthesize {
        config.fixer.synthesize_ids = false;
    }
    config.fixer.tag_map.extend(mappings.iter().cloned());

    let registry = config.registry()?;
    let target = config.fixer.target;
    let engine = Engine::new(config, registry);
    let run = engine
        .fix_file(file)
        .with_context(|| format!("failed to fix {}", file.display()))?;
    let outcome = &run.outcome;

    match &outcome.source_spec {
        Some(spec) if outcome.detection.is_unknown() => eprintln!(
            "{} format not recognised; mapped items using '{}'",
            "warning".yellow().bold(),
            spec
        ),
        Some(spec) => eprintln!("Detected: {}", spec.bold()),
        None => eprintln!(
            "{} format not recognised; mapped repeated elements",
            "warning".yellow().bold()
        ),
    }
    eprintln!(
        "Mapped {} item(s), emitted {} as {}",
        outcome.entries.len(),
        run.emitted,
        target
    );
    if outcome.synthesized_ids > 0 {
        eprintln!("Synthesized {} id(s) from links", outcome.synthesized_ids);
    }
    if outcome.missing_ids > 0 {
        eprintln!(
            "{} {} item(s) without id were dropped",
            "warning".yellow().bold(),
            outcome.missing_ids
        );
    }
    if !outcome.duplicate_ids.is_empty() || !outcome.duplicate_links.is_empty() {
        eprintln!(
            "Duplicates: {} id(s), {} link(s) ({:?})",
            outcome.duplicate_ids.len(),
            outcome.duplicate_links.len(),
            outcome.policy
        );
    }
    if !outcome.unmapped.is_empty() {
        eprintln!("{}", "Unmapped tags (use --map TAG=FIELD):".bold());
        for (tag, examples) in &outcome.unmapped {
            let example = examples.iter().next().map(String::as_str).unwrap_or("");
            eprintln!("  {:<24} e.g. '{}'", tag, example);
        }
    }

    match output {
        Some(path) => {
            std::fs::write(path, &run.output)
                .with_context(|| format!("failed to write {}", path.display()))?;
            eprintln!("{} Wrote {}", "success".green().bold(), path.display());
        }
        None => {
            use std::io::Write;
            std::io::stdout()
                .write_all(&run.output)
                .context("failed to write output")?;
        }
    }

    Ok(if outcome.missing_ids > 0 { 1 } else { 0 })
}

fn run_specs(cli: &Cli) -> Result<i32> {
    let config = load_config(cli)?;
    apply_color(config.output.color);
    let registry = config.registry()?;
    println!("{}", "Known specs (detection order):".bold());
    for spec in registry.iter() {
        println!(
            "  {:>4}  {:<52} items: {}",
            spec.priority,
            spec.name,
            selectors(&spec.item_paths)
        );
    }
    Ok(0)
}

fn run_explain(cli: &Cli, name: &str) -> Result<i32> {
    let config = load_config(cli)?;
    apply_color(config.output.color);
    let registry = config.registry()?;
    let Some(spec) = find_spec(&registry, name) else {
        bail!("unknown spec '{}'; run `feedcheck specs` to list them", name);
    };

    println!("{}", spec.name.bold());
    println!("  priority:      {}", spec.priority);
    println!("  items:         {}", selectors(&spec.item_paths));
    println!("  id:            {}", selectors(&spec.id_paths));
    println!("  link:          {}", selectors(&spec.link_paths));
    println!("  image:         {}", selectors(&spec.image_paths));
    println!("  gallery:       {}", selectors(&spec.gallery_paths));
    println!("  availability:  {}", selectors(&spec.availability_paths));
    println!("  price:         {}", selectors(&spec.price_paths));
    if let Some(rule) = &spec.availability_rule {
        println!("  availability rule: {:?}", rule);
    }
    if spec.checks_price() {
        let policy = &spec.price_policy;
        println!(
            "  price policy:  {:?}, currency {}, max {} decimals",
            policy.format,
            if policy.require_currency {
                "required"
            } else {
                "optional"
            },
            policy.max_decimals
        );
    }

    let required: Vec<String> = spec.required_fields.iter().map(|f| f.to_string()).collect();
    println!("  required:      {}", required.join(", "));
    println!("  signature:     {}", spec.signature_tags.join(", "));
    if !spec.expected_root_names.is_empty() {
        println!("  roots:         {}", spec.expected_root_names.join(", "));
    }

    let rule = &spec.detection;
    println!("{}", "Strict detection".bold());
    println!("  item element:  <{}>", rule.item_tag);
    if rule.require_root {
        println!("  root must be one of the roots above");
    }
    for fragment in &spec.required_namespace_fragments {
        println!("  requires namespace containing '{}'", fragment);
    }
    for fragment in &rule.forbidden_namespace_fragments {
        println!("  forbids namespace containing '{}'", fragment);
    }
    if let Some(shape) = &rule.item_shape {
        println!("  first item:    {:?}", shape);
    }
    Ok(0)
}

fn run(cli: &Cli) -> Result<i32> {
    match &cli.command {
        Commands::Check {
            files,
            format,
            sample,
            spec,
            jobs,
            limit,
            items,
        } => run_check(
            cli,
            files,
            *format,
            *sample,
            spec.as_deref(),
            *jobs,
            *limit,
            *items,
        ),
        Commands::Fix {
            file,
            output,
            target,
            mappings,
            currency,
            title,
            keep_duplicates,
            no_synthesize,
        } => run_fix(
            cli,
            file,
            output.as_deref(),
            *target,
            mappings,
            currency.as_deref(),
            title.as_deref(),
            *keep_duplicates,
            *no_synthesize,
        ),
        Commands::Specs => run_specs(cli),
        Commands::Explain { spec } => run_explain(cli, spec),
    }
}

fn main() {
    // Initialize logger
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let cli = Cli::parse();

    // Handle --no-color
    if cli.no_color {
        colored::control::set_override(false);
    }

    match run(&cli) {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("{}: {:#}", "error".red().bold(), e);
            std::process::exit(2);
        }
    }
}
