//! Fixed-rate tick loop around a [`Dispatcher`].

use crate::dispatcher::Dispatcher;
use crate::logger::Logger;
use crate::transport::Transport;
use log::{debug, info};
use std::future::Future;
use tokio::time::{interval, Duration, MissedTickBehavior};

/// Shortest period the loop will tick at, whatever rate is asked for
pub const MIN_TICK_PERIOD: Duration = Duration::from_millis(1);

/// Ticks `dispatcher` `tick_rate` times per second until `shutdown` resolves.
///
/// Each tick handles at most one event. Late ticks are skipped rather than
/// bunched up. On shutdown every open connection is closed. Returns the
/// number of ticks run.
pub async fn run<T, L, F>(dispatcher: &mut Dispatcher<T, L>, tick_rate: u32, shutdown: F) -> u64
where
    T: Transport,
    L: Logger,
    F: Future<Output = ()>,
{
    let tick_rate = tick_rate.max(1);
    let period = Duration::from_secs_f64(1.0 / tick_rate as f64).max(MIN_TICK_PERIOD);
    let mut tick_interval = interval(period);
    tick_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    tokio::pin!(shutdown);
    let mut ticks: u64 = 0;

    info!("Dispatcher running at {}Hz", tick_rate);

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!("Dispatcher shutting down after {} ticks", ticks);
                break;
            }
            _ = tick_interval.tick() => {
                dispatcher.tick();
                ticks += 1;

                if ticks % (tick_rate as u64 * 60) == 0 {
                    debug!(
                        "Tick {}: {} connections, {} registered servers",
                        ticks,
                        dispatcher.peer_count(),
                        dispatcher.registry().len()
                    );
                }
            }
        }
    }

    dispatcher.shutdown();
    ticks
}
