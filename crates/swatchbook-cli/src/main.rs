use std::fs;
use std::io::{self, BufRead, ErrorKind, Write};
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use swatchbook_contracts::events::EventWriter;
use swatchbook_contracts::sources::filename_from_url;
use swatchbook_engine::model::DRYRUN_MODEL;
use swatchbook_engine::{
    select_model, EnvSource, FetchConfig, Notice, Pipeline, ReportTemplate, RunRequest,
    SynthesisConfig,
};

const DEFAULT_REPORT_NAME: &str = "palette_report.html";

#[derive(Debug, Parser)]
#[command(name = "swatchbook", version, about = "Shared color palette reports for two images")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Download two images, synthesize a palette and write the HTML report.
    Run(RunArgs),
    /// Write the built-in report template so it can be customized.
    Template(TemplateArgs),
}

#[derive(Debug, Parser)]
struct RunArgs {
    /// URL of the first image (prompted for when omitted).
    #[arg(long)]
    image1: Option<String>,
    /// URL of the second image (prompted for when omitted).
    #[arg(long)]
    image2: Option<String>,
    /// Local filename for the first download; defaults to the URL's file name.
    #[arg(long)]
    name1: Option<String>,
    #[arg(long)]
    name2: Option<String>,
    /// Report path (prompted for when omitted).
    #[arg(long)]
    out: Option<PathBuf>,
    /// Where downloads are kept during the run; defaults to a fresh temp directory.
    /// Existing files there are never overwritten.
    #[arg(long)]
    work_dir: Option<PathBuf>,
    #[arg(long)]
    template: Option<PathBuf>,
    #[arg(long)]
    model: Option<String>,
    /// Use the offline model instead of Gemini.
    #[arg(long)]
    dryrun: bool,
    #[arg(long)]
    events: Option<PathBuf>,
    #[arg(long, default_value = ".env")]
    env_file: PathBuf,
}

#[derive(Debug, Parser)]
struct TemplateArgs {
    #[arg(long)]
    out: PathBuf,
}

fn main() {
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("swatchbook error: {err:#}");
            std::process::exit(1);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    match cli.command {
        Command::Run(args) => run_palette(args),
        Command::Template(args) => run_template(args),
    }
}

fn run_palette(args: RunArgs) -> Result<i32> {
    let env = EnvSource::load(Some(&args.env_file));
    let mut config = SynthesisConfig::from_env(&env);
    if let Some(model) = args.model.as_deref() {
        config.model = model.trim().to_string();
    }
    if args.dryrun {
        config.model = DRYRUN_MODEL.to_string();
    }
    if config.model != DRYRUN_MODEL && config.api_key.is_none() {
        bail!("GEMINI_API_KEY or GOOGLE_API_KEY not set (pass --dryrun to work offline)");
    }

    let stdin = io::stdin();
    let mut input = stdin.lock();
    let mut output = io::stdout();
    let image1_url = required_input(args.image1, "Enter URL for the first image: ", &mut input, &mut output)?;
    let image2_url = required_input(args.image2, "Enter URL for the second image: ", &mut input, &mut output)?;
    let report_path = match args.out {
        Some(path) => path,
        None => {
            let answer = prompt_line(
                &format!("Enter output filename for the HTML report [{DEFAULT_REPORT_NAME}]: "),
                &mut input,
                &mut output,
            )?;
            PathBuf::from(answer.filter(|value| !value.is_empty()).unwrap_or_else(|| DEFAULT_REPORT_NAME.to_string()))
        }
    };

    let scratch;
    let work_dir = match args.work_dir.clone() {
        Some(dir) => dir,
        None => {
            scratch = tempfile::Builder::new()
                .prefix("swatchbook-")
                .tempdir()
                .context("failed to create a work directory")?;
            scratch.path().to_path_buf()
        }
    };
    let (name1, name2) = download_names(&image1_url, &image2_url, args.name1, args.name2);
    let request = RunRequest {
        image1_url,
        image1_path: work_dir.join(name1),
        image2_url,
        image2_path: work_dir.join(name2),
        output: report_path,
    };

    let template = ReportTemplate::load(args.template.as_deref())?;
    for token in template.missing_tokens() {
        println!("Warning: template has no {token} placeholder; that part of the report is left out.");
    }

    let model = select_model(&config).context("failed to set up HTTP client")?;
    let mut pipeline = Pipeline::new(model.as_ref(), config.clone(), &FetchConfig::default(), template)?
        .on_notice(print_notice);
    if let Some(events_path) = args.events.as_ref() {
        let writer = EventWriter::for_new_run(events_path);
        println!("Run {} logging events to {}", writer.run_id(), events_path.display());
        pipeline = pipeline.with_events(writer);
    }

    let outcome = pipeline.run(&request)?;
    println!("Palette from {}:", outcome.model);
    for color in outcome.palette.colors() {
        println!(
            "  {} [{}] {} - {}",
            color.hex(),
            color.source(),
            color.description(),
            color.usage()
        );
    }
    println!(
        "HTML report saved to {} ({} bytes)",
        outcome.report_path.display(),
        outcome.report_bytes
    );
    Ok(0)
}

fn run_template(args: TemplateArgs) -> Result<i32> {
    if let Some(parent) = args.out.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    fs::write(&args.out, ReportTemplate::default().html())
        .with_context(|| format!("failed to write {}", args.out.display()))?;
    println!("Template written to {}", args.out.display());
    Ok(0)
}

fn print_notice(notice: &Notice) {
    match notice {
        Notice::Step(message) => println!("{message}"),
        Notice::Warning(message) => println!("Warning: {message}"),
    }
}

fn required_input(
    given: Option<String>,
    question: &str,
    input: &mut impl BufRead,
    output: &mut impl Write,
) -> Result<String> {
    if let Some(value) = given.map(|value| value.trim().to_string()).filter(|value| !value.is_empty()) {
        return Ok(value);
    }
    match prompt_line(question, input, output)? {
        Some(answer) if !answer.is_empty() => Ok(answer),
        _ => bail!("no answer given for: {}", question.trim().trim_end_matches(':')),
    }
}

/// `None` on end of input.
fn prompt_line(question: &str, input: &mut impl BufRead, output: &mut impl Write) -> Result<Option<String>> {
    write!(output, "{question}")?;
    output.flush()?;
    let mut line = String::new();
    loop {
        match input.read_line(&mut line) {
            Ok(0) => return Ok(None),
            Ok(_) => return Ok(Some(line.trim().to_string())),
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) => return Err(err.into()),
        }
    }
}

/// Explicit names win; otherwise the URL's file name, then `imageN.jpg`.
/// Equal names get an index prefix so the downloads never overwrite each other.
fn download_names(
    url1: &str,
    url2: &str,
    name1: Option<String>,
    name2: Option<String>,
) -> (String, String) {
    let pick = |given: Option<String>, url: &str, fallback: &str| {
        given
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
            .or_else(|| filename_from_url(url))
            .unwrap_or_else(|| fallback.to_string())
    };
    let first = pick(name1, url1, "image1.jpg");
    let second = pick(name2, url2, "image2.jpg");
    if first == second {
        return (format!("1-{first}"), format!("2-{second}"));
    }
    (first, second)
}
