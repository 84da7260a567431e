use std::process::ExitCode;

use clap::Parser;
use dcfsync_cli::command::{Cli, Commands, ReadArgs, WriteArgs};
use dcfsync_client::{
    common::NodeId,
    load_object_dictionary,
    network::{BusReceiver, BusSender},
    CancelToken, IniDocument, Network, Node, SyncEngine, SyncError, SyncOptions, SyncReport,
};

type Bus = Network<BusSender, BusReceiver>;

fn print_report(report: &SyncReport) {
    for failure in &report.failures {
        println!("Failed: {failure}");
    }
    println!(
        "{} transferred, {} skipped, {} failed",
        report.transferred,
        report.skipped,
        report.failures.len()
    );
}

fn finish(result: Result<SyncReport, SyncError>) -> ExitCode {
    match result {
        Ok(report) => {
            print_report(&report);
            ExitCode::SUCCESS
        }
        Err(e) => {
            if let SyncError::Connectivity { report, .. } | SyncError::Cancelled { report } = &e {
                print_report(report);
            }
            eprintln!("{e}");
            ExitCode::FAILURE
        }
    }
}

fn read(args: &ReadArgs, node_id: NodeId, network: &Bus, engine: &SyncEngine) -> ExitCode {
    let mut doc = match IniDocument::load(&args.eds) {
        Ok(doc) => doc,
        Err(e) => {
            eprintln!("{e}");
            return ExitCode::FAILURE;
        }
    };
    let od = match load_object_dictionary(&doc, node_id) {
        Ok(od) => od,
        Err(e) => {
            eprintln!("Error loading {}: {e}", args.eds.display());
            return ExitCode::FAILURE;
        }
    };
    let mut node = network.add_node(node_id, od);

    let result = engine.read(&mut node, &mut doc, &CancelToken::new());
    if result.is_ok() {
        let output = args.output_path();
        if let Err(e) = doc.save(&output) {
            eprintln!("{e}");
            return ExitCode::FAILURE;
        }
        log::info!("Saved {}", output.display());
    }
    finish(result)
}

fn write(args: &WriteArgs, node_id: NodeId, network: &Bus, engine: &SyncEngine) -> ExitCode {
    let doc = match IniDocument::load(&args.dcf) {
        Ok(doc) => doc,
        Err(e) => {
            eprintln!("{e}");
            return ExitCode::FAILURE;
        }
    };
    let od = match load_object_dictionary(&doc, node_id) {
        Ok(od) => od,
        Err(e) => {
            eprintln!("Error loading {}: {e}", args.dcf.display());
            return ExitCode::FAILURE;
        }
    };
    let mut node = network.add_node(node_id, od);
    log::info!(
        "Writing {} to node {}",
        args.dcf.display(),
        node.node_id()
    );
    finish(engine.write(&mut node, &CancelToken::new()))
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    let options = match &cli.options {
        Some(path) => match SyncOptions::load_from_file(path) {
            Ok(options) => options,
            Err(e) => {
                eprintln!("Error loading options: {e}");
                return ExitCode::FAILURE;
            }
        },
        None => SyncOptions::default(),
    };
    let engine = SyncEngine::new(options);

    let network = match Network::connect(cli.bustype, &cli.interface) {
        Ok(network) => network,
        Err(e) => {
            eprintln!("{e}");
            return ExitCode::FAILURE;
        }
    };

    match &cli.command {
        Commands::Read(args) => read(args, cli.nodeid, &network, &engine),
        Commands::Write(args) => write(args, cli.nodeid, &network, &engine),
    }
}
