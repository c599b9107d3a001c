//! Fixed-rate local prediction loop.

use crate::game::SharedWorld;
use crate::input::InputCapture;
use log::{debug, info};
use shared::{InputSample, Pacer, PhysicsEngine, ShutdownSignal};
use tokio::sync::mpsc;

/// Each tick: snapshot live input, predict under the world lock, then queue
/// the stamped sample for upload. Runs until shutdown or until the network
/// side stops listening.
pub async fn run_prediction_loop<E: PhysicsEngine>(
    world: SharedWorld<E>,
    capture: InputCapture,
    outbound: mpsc::UnboundedSender<InputSample>,
    tick_rate: u32,
    mut shutdown: ShutdownSignal,
) {
    let mut pacer = Pacer::new(tick_rate);
    let mut ticks: u64 = 0;

    loop {
        let dt = tokio::select! {
            _ = shutdown.triggered() => break,
            dt = pacer.tick() => dt,
        };

        let input = capture.snapshot();
        let stamped = world.lock().await.predict(input, dt);
        ticks += 1;

        if let Some(sample) = stamped {
            if outbound.send(sample).is_err() {
                debug!("Outbound channel closed, stopping prediction");
                break;
            }
        }
    }

    info!("Prediction loop stopped after {} ticks", ticks);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::ClientWorld;
    use shared::{shutdown_channel, FlatWorld, MonotonicClock, DEFAULT_RETENTION};
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn test_prediction_loop_sends_stamped_samples() {
        let world = ClientWorld::new(
            FlatWorld::new(),
            DEFAULT_RETENTION,
            Arc::new(MonotonicClock::new()),
        )
        .into_shared();
        world.lock().await.activate(3);

        let capture = InputCapture::new();
        capture.set_movement(true, false, false, false, false);
        let (outbound, mut samples) = mpsc::unbounded_channel();
        let (trigger, signal) = shutdown_channel();

        let task = tokio::spawn(run_prediction_loop(
            Arc::clone(&world),
            capture,
            outbound,
            120,
            signal,
        ));

        let mut received = Vec::new();
        while received.len() < 3 {
            let sample = tokio::time::timeout(Duration::from_secs(1), samples.recv())
                .await
                .expect("sample within timeout")
                .expect("loop running");
            received.push(sample);
        }
        trigger.trigger();
        task.await.unwrap();

        assert!(received.iter().all(|s| s.client_id == 3 && s.forward));
        assert!(received.windows(2).all(|w| w[0].timestamp_ns < w[1].timestamp_ns));
        assert!(world.lock().await.history_len() >= 3);
    }

    #[tokio::test]
    async fn test_prediction_without_avatar_sends_nothing() {
        let world = ClientWorld::new(
            FlatWorld::new(),
            DEFAULT_RETENTION,
            Arc::new(MonotonicClock::new()),
        )
        .into_shared();
        let (outbound, mut samples) = mpsc::unbounded_channel();
        let (trigger, signal) = shutdown_channel();

        let task = tokio::spawn(run_prediction_loop(
            world,
            InputCapture::new(),
            outbound,
            200,
            signal,
        ));
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.trigger();
        task.await.unwrap();

        assert!(samples.try_recv().is_err());
    }
}
