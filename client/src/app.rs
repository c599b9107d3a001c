//! Client application wiring: one shared world, a prediction task and a
//! network task, stopped together through a single shutdown trigger.

use crate::game::{ClientWorld, SharedWorld};
use crate::input::{run_wander_bot, InputCapture};
use crate::network::{Client, ClientConfig};
use crate::simulation::run_prediction_loop;
use log::{error, info};
use shared::{shutdown_channel, FlatWorld, MonotonicClock, NetError, ShutdownSignal, ShutdownTrigger};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

pub struct ClientApp {
    world: SharedWorld,
    input: InputCapture,
    trigger: ShutdownTrigger,
    network: JoinHandle<Result<(), NetError>>,
    prediction: JoinHandle<()>,
    bot: Option<JoinHandle<()>>,
}

impl ClientApp {
    /// Connects to the server and starts predicting. Must be called inside a
    /// tokio runtime.
    pub async fn start(config: ClientConfig) -> Result<Self, NetError> {
        let world = ClientWorld::new(
            FlatWorld::new(),
            config.history_retention,
            Arc::new(MonotonicClock::new()),
        )
        .into_shared();

        let client = Client::connect(&config, Arc::clone(&world)).await?;
        let (trigger, signal) = shutdown_channel();
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let input = InputCapture::new();

        let network = tokio::spawn(client.run(outbound_rx, signal.clone(), config.service_timeout));
        let prediction = tokio::spawn(run_prediction_loop(
            Arc::clone(&world),
            input.clone(),
            outbound,
            config.tick_rate,
            signal,
        ));

        info!("Client started at {} ticks per second", config.tick_rate);
        Ok(ClientApp {
            world,
            input,
            trigger,
            network,
            prediction,
            bot: None,
        })
    }

    pub fn world(&self) -> SharedWorld {
        Arc::clone(&self.world)
    }

    pub fn input(&self) -> InputCapture {
        self.input.clone()
    }

    pub fn signal(&self) -> ShutdownSignal {
        self.trigger.signal()
    }

    /// Lets the wander bot drive input instead of a keyboard.
    pub fn spawn_bot(&mut self) {
        if self.bot.is_none() {
            self.bot = Some(tokio::spawn(run_wander_bot(self.input(), self.signal())));
        }
    }

    /// The network task ends by itself when the server disconnects.
    pub fn is_network_finished(&self) -> bool {
        self.network.is_finished()
    }

    pub async fn shutdown(self) -> Result<(), NetError> {
        self.trigger.trigger();

        if let Err(e) = self.prediction.await {
            error!("Prediction task panicked: {}", e);
        }
        if let Some(bot) = self.bot {
            if let Err(e) = bot.await {
                error!("Input bot panicked: {}", e);
            }
        }
        match self.network.await {
            Ok(result) => result,
            Err(e) => {
                error!("Network task panicked: {}", e);
                Ok(())
            }
        }
    }
}
