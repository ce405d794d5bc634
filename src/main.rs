use anyhow::Result;
use bundle_forge::cli::{BuildArgs, Cli, Commands};
use bundle_forge::clazz::ClassInfo;
use bundle_forge::classpath::resolve_classpath;
use bundle_forge::config::{TaskFile, build_task, load_task_file, resolve_work_dir};
use bundle_forge::visitor::visit_classes;
use clap::Parser;
use serde::Serialize;
use std::path::PathBuf;
use std::process::ExitCode;

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    match run(&cli) {
        Ok(code) => code,
        Err(e) => {
            log::error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: &Cli) -> Result<ExitCode> {
    match cli.command.clone() {
        Commands::Build(args) => build(cli, args),
        Commands::Inspect { archives } => {
            let classes = inspect(&archives)?;
            println!("{}", serde_json::to_string_pretty(&classes)?);
            Ok(ExitCode::SUCCESS)
        }
        Commands::Resolve { paths } => {
            let resolved = resolve_classpath(&paths);
            println!("{}", serde_json::to_string_pretty(&resolved)?);
            Ok(ExitCode::SUCCESS)
        }
    }
}

#[derive(Debug, Serialize)]
struct BuildFailure {
    jar: String,
    error: String,
}

fn build(cli: &Cli, args: BuildArgs) -> Result<ExitCode> {
    let file = args.task.as_deref().map(load_task_file).transpose()?;
    let flags = TaskFile {
        jar: args.jar,
        output: args.output,
        descriptor: args.descriptor,
        attributes: args.attributes.into_iter().collect(),
        classpath: args.classpath,
        sourcepath: args.sourcepath,
        base_name: args.base_name,
        version: args.version,
        project_dir: args.project_dir,
    };
    let task = build_task(file, flags, resolve_work_dir(cli))?;

    match task.build() {
        Ok(report) => {
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(ExitCode::SUCCESS)
        }
        Err(e) => {
            log::error!("{e}");
            let failure = BuildFailure {
                jar: e.jar().to_string(),
                error: e.to_string(),
            };
            println!("{}", serde_json::to_string_pretty(&failure)?);
            Ok(ExitCode::FAILURE)
        }
    }
}

#[derive(Debug, Serialize)]
struct InspectedClass {
    archive: String,
    #[serde(flatten)]
    class: ClassInfo,
}

fn inspect(archives: &[PathBuf]) -> Result<Vec<InspectedClass>> {
    let mut out = Vec::new();
    for archive in archives {
        let name = archive.display().to_string();
        visit_classes(std::slice::from_ref(archive), |class| {
            out.push(InspectedClass {
                archive: name.clone(),
                class: class.clone(),
            });
            Ok(true)
        })?;
    }
    Ok(out)
}
