use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{exit, Command, ExitStatus};

use clap::{Parser, Subcommand, ValueEnum};
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipWriter};

// ── CLI definition ─────────────────────────────────────────────────

#[derive(Parser)]
#[command(
    name = "xtask",
    about = "Task runner for the account vending workspace",
    long_about = "A unified CLI for CI checks and Lambda packaging in the\n\
                  account vending workspace."
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run CI checks (fmt, clippy, tests)
    Ci {
        /// Job to run
        #[arg(value_enum, default_value_t = CiJob::Check)]
        job: CiJob,
    },
    /// Run the test suite of one workspace crate, or all of them
    Test {
        /// Package to test
        #[arg(long)]
        package: Option<String>,
    },
    /// Build and package the vending runtime Lambda for Terraform inputs
    ServerlessPackage {
        /// Compilation target triple for Lambda binaries
        #[arg(long, default_value = "x86_64-unknown-linux-gnu")]
        target: String,
        /// Build profile used for binaries
        #[arg(value_enum, long, default_value_t = BuildProfile::Release)]
        profile: BuildProfile,
        /// Directory the zips are written to
        #[arg(long, default_value = "infra/account_vending/dist")]
        out_dir: PathBuf,
    },
}

#[derive(Clone, ValueEnum)]
enum CiJob {
    /// Formatting and clippy
    Lint,
    /// Tests of every workspace crate
    Test,
    /// Formatting, clippy, and tests
    Check,
}

#[derive(Clone, Copy, ValueEnum)]
enum BuildProfile {
    Debug,
    Release,
}

impl BuildProfile {
    fn dir_name(self) -> &'static str {
        match self {
            Self::Debug => "debug",
            Self::Release => "release",
        }
    }

    fn as_cargo_flag(self) -> Option<&'static str> {
        match self {
            Self::Debug => None,
            Self::Release => Some("--release"),
        }
    }
}

// ── helpers ────────────────────────────────────────────────────────

fn step(label: &str) {
    eprintln!("\n=== {label} ===");
}

fn cargo(args: &[&str]) -> ExitStatus {
    eprintln!("+ cargo {}", args.join(" "));
    Command::new("cargo")
        .args(args)
        .status()
        .expect("failed to execute cargo")
}

fn run_cargo(args: &[&str]) {
    let status = cargo(args);
    if !status.success() {
        exit(status.code().unwrap_or(1));
    }
}

/// A Lambda binary and the zip it ships in.
struct LambdaArtifact {
    bin: &'static str,
    zip: &'static str,
}

const LAMBDA_ARTIFACTS: [LambdaArtifact; 1] = [LambdaArtifact {
    bin: "vending_runtime",
    zip: "runtime.zip",
}];

fn package_serverless_lambdas(target: &str, profile: BuildProfile, out_dir: &Path) {
    require_installed_target(target);

    for artifact in &LAMBDA_ARTIFACTS {
        step(&format!("Build {}", artifact.bin));
        let mut cargo_args = vec![
            "build",
            "-p",
            "vending_lambda",
            "--target",
            target,
            "--bin",
            artifact.bin,
        ];
        cargo_args.extend(profile.as_cargo_flag());
        run_cargo(&cargo_args);
    }

    step("Zip Lambda artifacts");
    let build_dir = Path::new("target").join(target).join(profile.dir_name());
    fs::create_dir_all(out_dir).expect("failed to create lambda output directory");
    for artifact in &LAMBDA_ARTIFACTS {
        let zip_path = out_dir.join(artifact.zip);
        zip_as_bootstrap(&build_dir.join(artifact.bin), &zip_path);
        eprintln!("packaged {}", zip_path.display());
    }
}

/// Exits unless `target` is installed. Skipped when rustup is unavailable.
fn require_installed_target(target: &str) {
    let Ok(output) = Command::new("rustup")
        .args(["target", "list", "--installed"])
        .output()
    else {
        eprintln!("warning: rustup not found; skipping target check");
        return;
    };

    let installed = String::from_utf8_lossy(&output.stdout);
    if !installed.lines().any(|line| line.trim() == target) {
        eprintln!("rust target `{target}` is missing; run `rustup target add {target}`");
        exit(1);
    }
}

/// The provided.al2023 runtime executes the zip entry named `bootstrap`.
fn zip_as_bootstrap(binary_path: &Path, zip_path: &Path) {
    let binary = fs::read(binary_path)
        .unwrap_or_else(|error| panic!("cannot read {}: {error}", binary_path.display()));
    let mut zip = ZipWriter::new(fs::File::create(zip_path).expect("failed to create zip"));
    let options = FileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .unix_permissions(0o755);
    zip.start_file("bootstrap", options)
        .expect("failed to start bootstrap entry");
    zip.write_all(&binary).expect("failed to write bootstrap entry");
    zip.finish().expect("failed to finish lambda zip");
}

// ── CI jobs ────────────────────────────────────────────────────────

const TESTED_PACKAGES: [&str; 2] = ["vending_core", "vending_lambda"];

fn ci_lint() {
    step("Check formatting");
    run_cargo(&["fmt", "--all", "--", "--check"]);

    step("Clippy");
    run_cargo(&[
        "clippy",
        "--all-targets",
        "--all-features",
        "--",
        "-D",
        "warnings",
    ]);
}

fn ci_test() {
    for package in TESTED_PACKAGES {
        step(&format!("Test {package}"));
        run_cargo(&["test", "-p", package]);
    }
}

// ── main ───────────────────────────────────────────────────────────

fn main() {
    let cli = Cli::parse();

    match cli.command {
        Commands::Ci { job } => {
            match job {
                CiJob::Lint => ci_lint(),
                CiJob::Test => ci_test(),
                CiJob::Check => {
                    ci_lint();
                    ci_test();
                }
            }
            eprintln!("\nCI job passed.");
        }
        Commands::Test { package } => match package {
            Some(package) => run_cargo(&["test", "-p", &package]),
            None => run_cargo(&["test", "--workspace"]),
        },
        Commands::ServerlessPackage {
            target,
            profile,
            out_dir,
        } => package_serverless_lambdas(&target, profile, &out_dir),
    }
}
