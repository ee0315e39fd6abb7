//! Client pool and dispatch modes.
//!
//! Closed-loop: `concurrency` clients are created up front and each issues
//! its next request as soon as the previous one completes.
//!
//! Open-loop: no client exists up front. A [`DriftCorrectingTimer`] fires at
//! the target rate; each firing takes a client from the free queue (creating
//! one if the queue is empty) and issues one request, after which the client
//! returns to the queue. Offered load is therefore independent of how fast
//! the target answers.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;
use tokio::task::JoinSet;

use crate::client::Client;
use crate::context::RunContext;
use crate::error::Result;
use crate::timer::DriftCorrectingTimer;

#[derive(Debug)]
pub(crate) struct ClientPool {
    ctx: Arc<RunContext>,
    tasks: Arc<Mutex<JoinSet<()>>>,
    free: Arc<Mutex<VecDeque<Client>>>,
    created: Arc<AtomicUsize>,
    dispatched: Arc<AtomicUsize>,
    timer: Option<DriftCorrectingTimer>,
}

impl ClientPool {
    pub(crate) fn new(ctx: Arc<RunContext>) -> Self {
        Self {
            ctx,
            tasks: Arc::new(Mutex::new(JoinSet::new())),
            free: Arc::new(Mutex::new(VecDeque::new())),
            created: Arc::new(AtomicUsize::new(0)),
            dispatched: Arc::new(AtomicUsize::new(0)),
            timer: None,
        }
    }

    /// Number of clients created so far.
    pub(crate) fn clients(&self) -> usize {
        self.created.load(Ordering::Relaxed)
    }

    /// Number of requests handed to a client so far.
    pub(crate) fn dispatched(&self) -> usize {
        self.dispatched.load(Ordering::Relaxed)
    }

    pub(crate) fn start(&mut self) -> Result<()> {
        match self.ctx.config.requests_per_second {
            None => {
                self.start_closed_loop();
                Ok(())
            }
            Some(rate) => self.start_open_loop(rate),
        }
    }

    fn start_closed_loop(&mut self) {
        let concurrency = self.ctx.config.concurrency;
        let mut tasks = self.tasks.lock();
        for _ in 0..concurrency {
            let ctx = Arc::clone(&self.ctx);
            let mut client = Client::new(Arc::clone(&ctx));
            let dispatched = Arc::clone(&self.dispatched);
            self.created.fetch_add(1, Ordering::Relaxed);

            tasks.spawn(async move {
                client.start().await;
                while !ctx.should_stop() {
                    dispatched.fetch_add(1, Ordering::Relaxed);
                    client.make_request().await;
                }
                ctx.stop();
                client.stop().await;
            });
        }
        tracing::debug!(clients = concurrency, "closed-loop dispatch started");
    }

    fn start_open_loop(&mut self, rate: f64) -> Result<()> {
        let ctx = Arc::clone(&self.ctx);
        let tasks = Arc::clone(&self.tasks);
        let free = Arc::clone(&self.free);
        let created = Arc::clone(&self.created);
        let dispatched = Arc::clone(&self.dispatched);

        let timer = DriftCorrectingTimer::with_rate(rate, move || {
            if ctx.should_stop() {
                ctx.stop();
                return;
            }
            let client = free.lock().pop_front();
            let ctx = Arc::clone(&ctx);
            let free = Arc::clone(&free);
            let created = Arc::clone(&created);
            dispatched.fetch_add(1, Ordering::Relaxed);

            let mut tasks = tasks.lock();
            while let Some(result) = tasks.try_join_next() {
                if let Err(e) = result {
                    if e.is_panic() {
                        tracing::warn!(error = %e, "request task panicked");
                    }
                }
            }
            tasks.spawn(async move {
                let mut client = match client {
                    Some(client) => client,
                    None => {
                        created.fetch_add(1, Ordering::Relaxed);
                        let mut client = Client::new(Arc::clone(&ctx));
                        client.start().await;
                        client
                    }
                };
                client.make_request().await;
                free.lock().push_back(client);
            });
        })?;

        tracing::debug!(rate, period = ?timer.period(), "open-loop dispatch started");
        self.timer = Some(timer);
        Ok(())
    }

    /// Stop dispatching, discard in-flight requests and close every client.
    pub(crate) async fn stop(&mut self) {
        if let Some(timer) = self.timer.as_mut() {
            timer.stop().await;
        }

        let mut tasks = std::mem::take(&mut *self.tasks.lock());
        tasks.shutdown().await;

        let clients: Vec<Client> = self.free.lock().drain(..).collect();
        for mut client in clients {
            client.stop().await;
        }
        tracing::debug!(
            clients = self.clients(),
            dispatched = self.dispatched(),
            "client pool stopped"
        );
    }
}
