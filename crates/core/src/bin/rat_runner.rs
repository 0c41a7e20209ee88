//! Loads a whisker table and drives a gang of on/off RAT senders over a
//! simulated bottleneck link.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use remy::config::{set_logger, RunnerArgs};
use remy::simulation::{RealTime, SimLink, SimulationRng};
use remy::transport::rat::{Feedback, RatConfig, RatController, SenderGang};
use remy::transport::socket_opt::TcpCongestionOption;
use remy::whisker::{load_whiskers_into, WhiskerTree};

const ACK_POLL_INTERVAL: Duration = Duration::from_millis(1);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = RunnerArgs::parse();
    set_logger(args.log_level);

    let base = WhiskerTree::new().with_mode(args.insert_mode());
    let tree = load_whiskers_into(base, &args.whiskers, args.load_mode())
        .with_context(|| format!("loading whiskers from {}", args.whiskers.display()))?;
    println!("{tree}");
    if args.diagnose {
        println!("{} overlapping whisker regions", tree.log_overlaps());
    }

    let time = RealTime::new();
    let rng = SimulationRng::new(args.seed);
    let controller = Arc::new(RatController::with_time_source(
        tree,
        RatConfig::default(),
        time.clone(),
    ));

    let installer = TcpCongestionOption::default();
    if let Err(err) = controller.start(&installer).await {
        tracing::warn!(
            %err,
            algorithm = installer.algorithm(),
            "could not install congestion control on the OS transport, continuing in simulation"
        );
    }

    let link = Arc::new(SimLink::new(args.link_config(), time, rng.child_with_index(u64::MAX)));
    let mut gang = SenderGang::spawn(controller.clone(), link.clone(), &args.gang_config(), &rng);
    let feedback = link.clone();
    gang.spawn_receiver(controller.clone(), ACK_POLL_INTERVAL, move || {
        Feedback::from_link(&feedback)
    });

    tokio::time::sleep(args.run_duration()).await;
    let report = gang.shutdown().await.inspect_err(|err| {
        tracing::error!(%err, "sender gang failed");
    })?;

    let stats = controller.stats();
    let link_stats = link.stats();
    println!(
        "sent {} packets, {} acknowledged, {} reported lost, window {}, min rtt {:?}",
        report.packets_sent(),
        report.acks_received,
        report.losses_reported,
        stats.congestion_window,
        stats.min_rtt
    );
    println!(
        "link: {} delivered, {} dropped (queue full), {} lost",
        link_stats.delivered, link_stats.dropped_queue_full, link_stats.dropped_loss
    );
    Ok(())
}
