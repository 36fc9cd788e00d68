use clap::Parser;
use std::io::Read;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tread::{Plan, RunInstance, Runner};

#[derive(Parser)]
#[command(name = "tread")]
#[command(about = "Runs branchified natural-language test plans")]
#[command(version)]
struct Cli {
    /// Plan file (.json or .yaml/.yml) produced by the tree builder
    #[arg()]
    plan_file: Option<String>,

    /// Parse the plan as YAML regardless of extension
    #[arg(long = "yaml")]
    yaml: bool,

    /// Suppress per-step console output
    #[arg(short = 'q', long = "quiet")]
    quiet: bool,

    /// Output the result summary as JSON (passed, failed, skipped)
    #[arg(long = "json")]
    json: bool,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Plan source: file argument or stdin
    let plan = if let Some(ref file) = cli.plan_file {
        match Plan::load(Path::new(file)) {
            Ok(plan) => plan,
            Err(e) => {
                eprintln!("Error: {}", e);
                std::process::exit(1);
            }
        }
    } else {
        use std::io::IsTerminal;
        if std::io::stdin().is_terminal() {
            eprintln!("Error: No plan provided. Pass a plan file or pipe one via stdin.");
            std::process::exit(1);
        }
        let mut buf = String::new();
        std::io::stdin().read_to_string(&mut buf).unwrap_or_default();
        let parsed = if cli.yaml { Plan::from_yaml(&buf) } else { Plan::from_json(&buf) };
        match parsed {
            Ok(plan) => plan,
            Err(e) => {
                eprintln!("Error: {}", e);
                std::process::exit(1);
            }
        }
    };

    let (tree, global_init) = plan.into_tree();
    let tree = Arc::new(Mutex::new(tree));

    let mut runner = Runner::new().with_console_output(!cli.quiet && !cli.json);
    runner.global_init = global_init;

    let mut instance = RunInstance::new(Arc::new(runner), tree.clone());
    if let Err(e) = instance.run().await {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }

    let (passed, failed, skipped) = tree.lock().unwrap().counts();
    if cli.json {
        println!(
            "{}",
            serde_json::json!({
                "passed": passed,
                "failed": failed,
                "skipped": skipped,
            })
        );
    } else {
        println!("{} passed, {} failed, {} skipped", passed, failed, skipped);
    }

    std::process::exit(if failed > 0 { 1 } else { 0 });
}
