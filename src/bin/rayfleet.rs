use std::io::{BufRead as _, Write as _};
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;

use rayfleet::driver::{
    ProviderSelection, TARGET_WALL_CLOCK_HOURS, create_providers, plan_job, render_movie,
    select_single_provider,
};
use rayfleet::provider::Provider;

#[derive(Parser, Debug)]
#[command(name = "rayfleet", version)]
struct Cli {
    /// Render on this machine using a local worker container.
    #[arg(long, default_value_t = false)]
    local: bool,

    /// Use Google Compute Engine with the given credential keyfile.
    #[arg(long, value_name = "KEYFILE")]
    gce: Option<PathBuf>,

    /// Use Amazon EC2 with a JSON credentials file
    /// ({"access_key": ..., "secret_access_key": ...}).
    #[arg(long, value_name = "CREDENTIALS")]
    aws: Option<PathBuf>,

    /// Use an in-process fake worker (testing only).
    #[arg(long, default_value_t = false)]
    fake: bool,

    /// Input job file containing a serialized RenderMovieTask.
    #[arg(long)]
    input: PathBuf,

    /// Output H.264/MP4 path.
    #[arg(long = "output-mp4")]
    output_mp4: PathBuf,
}

fn main() {
    tracing_subscriber::fmt().init();
    let cli = Cli::parse();
    match run(cli) {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("rayfleet: {e:#}");
            std::process::exit(2);
        }
    }
}

fn run(cli: Cli) -> anyhow::Result<i32> {
    let debug = rayfleet::debug::DebugFrontend::spawn()?;
    eprintln!("debugger interface: http://localhost:{}/debug", debug.port());

    let (job, cores_needed) = plan_job(&cli.input)?;
    debug.register(Arc::new(rayfleet::debug::TextPanel {
        title: "Job".to_owned(),
        body: format!(
            "{} frames at {} fps, {:.1} cores needed",
            job.frame_count(),
            job.framerate,
            cores_needed
        ),
    }));

    let selection = ProviderSelection {
        local: cli.local,
        gce_keyfile: cli.gce.clone(),
        aws_credentials: cli.aws.clone(),
        fake: cli.fake,
    };
    let providers = create_providers(
        &selection,
        cores_needed,
        TARGET_WALL_CLOCK_HOURS,
        Some(&debug),
    );
    let provider = match select_single_provider(providers) {
        Ok(provider) => provider,
        Err(e) => {
            eprintln!("{e}");
            return Ok(1);
        }
    };

    if !ask_billing_plan(provider.as_ref())? {
        eprintln!("cancelled");
        return Ok(0);
    }

    render_movie(job, provider, &cli.output_mp4, Some(&debug))?;
    Ok(0)
}

/// Print the estimated price and ask for confirmation before any expense.
fn ask_billing_plan(provider: &dyn Provider) -> anyhow::Result<bool> {
    let (name, price) = provider.calc_bill();
    println!("==================== Estimated Price ====================");
    println!("{name}  {price:.2} USD");
    println!("---------------------------------------------------------");
    print!("Are you sure? [y/N] ");
    std::io::stdout().flush()?;

    let mut answer = String::new();
    std::io::stdin().lock().read_line(&mut answer)?;
    Ok(answer.trim() == "y")
}
