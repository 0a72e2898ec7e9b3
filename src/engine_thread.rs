//! Engine on a dedicated OS thread.

use std::sync::mpsc;
use std::thread::{self, JoinHandle};

use crate::config::EngineConfig;
use crate::engine::Engine;
use crate::env::Env;
use crate::error::{Error, Result};

type InitSignal<T> = Result<(Env, T)>;

/// Handle to an [`Engine`] running on its own thread.
///
/// The thread creates the engine, runs the init closure inside a call-scope,
/// then drives the event loop until it is idle (or until the configured
/// `loop_timeout` elapses).
pub struct EngineThread {
    env: Env,
    handle: JoinHandle<Result<()>>,
}

impl EngineThread {
    /// Spawn the engine thread and wait for its initialization.
    ///
    /// `init` typically creates the synchronization contexts and references
    /// the host needs, and hands them back as `T`.
    pub fn spawn<F, T>(config: EngineConfig, init: F) -> Result<(Self, T)>
    where
        F: FnOnce(&mut v8::PinScope) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let (init_tx, init_rx) = mpsc::channel::<InitSignal<T>>();
        let thread_name = config.thread_name.clone();

        let handle = thread::Builder::new()
            .name(thread_name.clone())
            .spawn(move || {
                let loop_timeout = config.loop_timeout;

                let mut engine = match Engine::new(config) {
                    Ok(engine) => engine,
                    Err(err) => {
                        let _ = init_tx.send(Err(err));
                        return Ok(());
                    }
                };

                match engine.with_scope(init) {
                    Ok(value) => {
                        let _ = init_tx.send(Ok((engine.env().clone(), value)));
                    }
                    Err(err) => {
                        let _ = init_tx.send(Err(err));
                        return Ok(());
                    }
                }

                match loop_timeout {
                    Some(timeout) => engine.run_event_loop_for(timeout),
                    None => {
                        engine.run_event_loop();
                        Ok(())
                    }
                }
            })
            .map_err(|e| Error::Startup(format!("failed to spawn '{}': {}", thread_name, e)))?;

        match init_rx.recv() {
            Ok(Ok((env, value))) => {
                log::debug!("Engine thread '{}' started (env {})", thread_name, env.id());
                Ok((Self { env, handle }, value))
            }
            Ok(Err(err)) => {
                let _ = handle.join();
                Err(err)
            }
            // The sender was dropped without a message: init panicked.
            Err(_) => match handle.join() {
                Ok(_) => Err(Error::Startup("engine thread exited during startup".into())),
                Err(_) => Err(Error::EngineThreadPanicked),
            },
        }
    }

    pub fn env(&self) -> &Env {
        &self.env
    }

    /// Whether the thread has finished running its loop.
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Wait for the loop to go idle and the engine to shut down.
    pub fn join(self) -> Result<()> {
        self.handle.join().map_err(|_| Error::EngineThreadPanicked)?
    }
}

impl std::fmt::Debug for EngineThread {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineThread")
            .field("env", &self.env)
            .field("finished", &self.is_finished())
            .finish()
    }
}
