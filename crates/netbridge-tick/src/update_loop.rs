use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::{TickConfig, TickScheduler, Tickable};

#[derive(Debug)]
enum LoopCommand {
    Pause,
    Resume,
    Stop,
}

/// Background task that calls [`Tickable::tick`] at a fixed rate.
///
/// The task ends when [`stop`](Self::stop) is called or the loop is
/// dropped. Must be spawned from within a Tokio runtime.
#[derive(Debug)]
pub struct UpdateLoop {
    commands: mpsc::UnboundedSender<LoopCommand>,
    task: Option<JoinHandle<u64>>,
}

impl UpdateLoop {
    pub fn spawn<T>(target: T, config: TickConfig) -> Self
    where
        T: Tickable + Send + Sync + 'static,
    {
        let (commands, rx) = mpsc::unbounded_channel();
        let scheduler = TickScheduler::new(config);
        info!(rate_hz = scheduler.tick_rate_hz(), "update loop started");
        let task = tokio::spawn(run(target, scheduler, rx));
        Self {
            commands,
            task: Some(task),
        }
    }

    pub fn pause(&self) {
        let _ = self.commands.send(LoopCommand::Pause);
    }

    pub fn resume(&self) {
        let _ = self.commands.send(LoopCommand::Resume);
    }

    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    /// Stops the loop and returns how many ticks it fired.
    pub async fn stop(mut self) -> u64 {
        let _ = self.commands.send(LoopCommand::Stop);
        match self.task.take() {
            Some(task) => task.await.unwrap_or_default(),
            None => 0,
        }
    }
}

impl Drop for UpdateLoop {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

async fn run<T: Tickable>(
    target: T,
    mut scheduler: TickScheduler,
    mut commands: mpsc::UnboundedReceiver<LoopCommand>,
) -> u64 {
    loop {
        tokio::select! {
            command = commands.recv() => match command {
                Some(LoopCommand::Pause) => scheduler.pause(),
                Some(LoopCommand::Resume) => scheduler.resume(),
                Some(LoopCommand::Stop) | None => break,
            },
            _ = scheduler.wait_for_tick() => target.tick(),
        }
    }
    debug!(ticks = scheduler.tick_count(), "update loop stopped");
    scheduler.tick_count()
}
