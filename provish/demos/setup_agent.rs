//! Provision an agent on one host from a JSON plan.
//!
//! # Usage
//!
//! Linux host over SSH with a password:
//! ```bash
//! cargo run --example setup_agent -- --host 10.0.0.5 --user deploy \
//!     --password secret --plan plan.json --mirror 10.0.0.1
//! ```
//!
//! Windows host over the administrative share:
//! ```bash
//! cargo run --example setup_agent -- --host 10.0.0.9 --port 445 --os windows \
//!     --user Administrator --password secret --plan plan.json \
//!     --executor wmiexec.py --mirror 10.0.0.1
//! ```

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use provish::solution::{HttpFetcher, ProcessExecutor};
use provish::{
    CallbackSink, ConsoleSink, HostSolutions, HostTarget, LogSink, Provisioner, RunnerConfig,
    SessionOptions, SolutionRunner, TargetOs,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging (set RUST_LOG=debug for verbose output)
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();

    let identity = match (&args.password, &args.key) {
        (Some(password), _) => password.clone(),
        (None, Some(path)) => std::fs::read_to_string(path)?,
        (None, None) => {
            eprintln!("Error: Must provide either --password or --key");
            std::process::exit(1);
        }
    };

    let Some(plan_path) = &args.plan else {
        eprintln!("Error: --plan is required");
        std::process::exit(1);
    };
    let plan = HostSolutions::from_json(&std::fs::read_to_string(plan_path)?)?;

    let os: TargetOs = args.os.parse()?;
    let mut target = HostTarget::new(&args.host, args.port, &args.user, &identity).with_os(os);
    if let Some(passphrase) = &args.passphrase {
        target.credential = target.credential.with_passphrase(passphrase);
    }

    let mut config = RunnerConfig::new(&args.cache_dir, &args.remote_dir, &args.mirror);
    config.mirror_port = args.mirror_port;

    let options = SessionOptions {
        connect_timeout: Some(Duration::from_secs(args.timeout)),
        ..SessionOptions::default()
    };
    let executor = ProcessExecutor::new(&args.executor);

    println!(
        "Provisioning {}:{} ({}, {} solution)...",
        args.host,
        args.port,
        os,
        target.solution_kind()
    );

    match &args.callback_url {
        Some(url) => {
            let sink = CallbackSink::new(url, &args.task_id, &args.token, args.proxy.as_deref())?;
            run(config, sink, executor, options, &target, &plan).await
        }
        None => run(config, ConsoleSink, executor, options, &target, &plan).await,
    }
}

async fn run<L: LogSink>(
    config: RunnerConfig,
    sink: L,
    executor: ProcessExecutor,
    options: SessionOptions,
    target: &HostTarget,
    plan: &HostSolutions,
) -> Result<(), Box<dyn std::error::Error>> {
    let runner = SolutionRunner::new(config, HttpFetcher::default(), sink);
    let provisioner = Provisioner::new(runner, executor).with_session_options(options);

    provisioner.provision(target, plan).await?;
    println!("Done!");
    Ok(())
}

/// Simple argument parser (avoiding external dependencies)
struct Args {
    host: String,
    port: u16,
    user: String,
    password: Option<String>,
    key: Option<PathBuf>,
    passphrase: Option<String>,
    os: String,
    plan: Option<PathBuf>,
    cache_dir: PathBuf,
    remote_dir: String,
    mirror: String,
    mirror_port: u16,
    executor: String,
    callback_url: Option<String>,
    task_id: String,
    token: String,
    proxy: Option<String>,
    timeout: u64,
}

impl Args {
    fn parse() -> Self {
        let argv: Vec<String> = env::args().skip(1).collect();
        let mut args = Self {
            host: "localhost".to_string(),
            port: 22,
            user: env::var("USER").unwrap_or_else(|_| "root".to_string()),
            password: None,
            key: None,
            passphrase: None,
            os: "linux".to_string(),
            plan: None,
            cache_dir: env::temp_dir().join("provish-cache"),
            remote_dir: "/tmp/provish".to_string(),
            mirror: "127.0.0.1".to_string(),
            mirror_port: provish::solution::DEFAULT_MIRROR_PORT,
            executor: "wmiexec.py".to_string(),
            callback_url: None,
            task_id: "0".to_string(),
            token: String::new(),
            proxy: None,
            timeout: 10,
        };

        let mut iter = argv.into_iter();
        while let Some(flag) = iter.next() {
            if flag == "--help" {
                Self::print_help();
                std::process::exit(0);
            }
            let Some(value) = iter.next() else {
                eprintln!("Missing value for {}", flag);
                break;
            };
            match flag.as_str() {
                "--host" | "-h" => args.host = value,
                "--port" | "-p" => args.port = value.parse().unwrap_or(22),
                "--user" | "-u" => args.user = value,
                "--password" | "-P" => args.password = Some(value),
                "--key" | "-k" => args.key = Some(PathBuf::from(value)),
                "--passphrase" => args.passphrase = Some(value),
                "--os" => args.os = value,
                "--plan" => args.plan = Some(PathBuf::from(value)),
                "--cache-dir" => args.cache_dir = PathBuf::from(value),
                "--remote-dir" => args.remote_dir = value,
                "--mirror" => args.mirror = value,
                "--mirror-port" => {
                    args.mirror_port = value.parse().unwrap_or(args.mirror_port)
                }
                "--executor" => args.executor = value,
                "--callback-url" => args.callback_url = Some(value),
                "--task-id" => args.task_id = value,
                "--token" => args.token = value,
                "--proxy" => args.proxy = Some(value),
                "--timeout" | "-t" => args.timeout = value.parse().unwrap_or(10),
                _ => eprintln!("Unknown argument: {}", flag),
            }
        }
        args
    }

    fn print_help() {
        println!(
            r#"provish setup_agent example

USAGE:
    cargo run --example setup_agent -- [OPTIONS]

OPTIONS:
    -h, --host <HOST>          Target host [default: localhost]
    -p, --port <PORT>          SSH port, or 445 for Windows batch [default: 22]
    -u, --user <USER>          Account [default: $USER]
    -P, --password <PASS>      Password
    -k, --key <PATH>           Private key file
    --passphrase <PASS>        Private key passphrase
    --os <OS>                  linux, aix, solaris, darwin, freebsd, windows [default: linux]
    --plan <PATH>              JSON host plan
    --cache-dir <PATH>         Local dependency cache
    --remote-dir <PATH>        Destination directory on the target [default: /tmp/provish]
    --mirror <HOST>            Artifact mirror reachable from the target [default: 127.0.0.1]
    --mirror-port <PORT>       Artifact mirror port [default: 17981]
    --executor <PROGRAM>       Administrative-share helper [default: wmiexec.py]
    --callback-url <URL>       Report progress to <URL>/report_log/
    --task-id <ID>             Task id sent with reports
    --token <TOKEN>            Token sent with reports
    --proxy <URL>              HTTP proxy for reports
    -t, --timeout <SECS>       Connect timeout [default: 10]
    --help                     Print this help message
"#
        );
    }
}
