//! Long-poll loop that turns incoming chat messages into command replies.

use std::{collections::HashMap, sync::Arc, time::Duration};

use alerts_core::{
    Command, CommandHandler, Formatting, MessagingTransport, RecipientId,
    transport::telegram::TelegramTransport,
};
use tokio::sync::mpsc;
use tracing::{debug, warn};

const POLL_TIMEOUT_SECS: u64 = 30;
const RETRY_DELAY: Duration = Duration::from_secs(5);

/// A lane with nothing to do for this long shuts down.
const LANE_IDLE: Duration = Duration::from_secs(600);

/// A parsed command and the chat its replies go to.
type Job = (RecipientId, Command);

/// Serves commands until the task is aborted.
pub async fn poll_commands(telegram: Arc<TelegramTransport>, handler: CommandHandler) {
    let mut offset = None;
    let mut lanes = Lanes::new(handler, telegram.clone(), LANE_IDLE);

    loop {
        let messages = match telegram.get_updates(offset, POLL_TIMEOUT_SECS).await {
            Ok((messages, next_offset)) => {
                offset = next_offset;
                messages
            }
            Err(e) => {
                warn!(error = %e, "polling for commands failed, retrying");
                tokio::time::sleep(RETRY_DELAY).await;
                continue;
            }
        };

        lanes.prune();
        for message in messages {
            let Some(command) = Command::parse(&message.text) else {
                continue;
            };
            debug!(sender = %message.sender, ?command, "received command");
            lanes.submit(message.sender, message.chat, command);
        }
    }
}

/// One worker per sender, so one sender's commands run in arrival order while
/// different senders run concurrently. Workers exit after `idle` without jobs.
struct Lanes {
    handler: CommandHandler,
    transport: Arc<dyn MessagingTransport>,
    idle: Duration,
    senders: HashMap<RecipientId, mpsc::UnboundedSender<Job>>,
}

impl Lanes {
    fn new(
        handler: CommandHandler,
        transport: Arc<dyn MessagingTransport>,
        idle: Duration,
    ) -> Self {
        Self { handler, transport, idle, senders: HashMap::new() }
    }

    fn submit(&mut self, sender: RecipientId, chat: RecipientId, command: Command) {
        let job = match self.senders.get(&sender) {
            Some(lane) => match lane.send((chat, command)) {
                Ok(()) => return,
                // The lane went idle in the meantime.
                Err(mpsc::error::SendError(job)) => job,
            },
            None => (chat, command),
        };

        let lane = self.spawn_lane(sender.clone());
        if lane.send(job).is_err() {
            warn!(%sender, "command lane closed before its first job");
        }
        self.senders.insert(sender, lane);
    }

    /// Forget lanes whose worker has exited.
    fn prune(&mut self) {
        self.senders.retain(|_, lane| !lane.is_closed());
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.senders.len()
    }

    fn spawn_lane(&self, sender: RecipientId) -> mpsc::UnboundedSender<Job> {
        let (tx, mut rx) = mpsc::unbounded_channel::<Job>();
        let handler = self.handler.clone();
        let transport = self.transport.clone();
        let idle = self.idle;

        tokio::spawn(async move {
            loop {
                match tokio::time::timeout(idle, rx.recv()).await {
                    Ok(Some(job)) => run_job(&handler, transport.as_ref(), &sender, job).await,
                    Ok(None) => break,
                    Err(_) => {
                        // Refuse new jobs, then finish whatever raced in.
                        rx.close();
                        while let Ok(job) = rx.try_recv() {
                            run_job(&handler, transport.as_ref(), &sender, job).await;
                        }
                        debug!(%sender, "command lane idle, closing");
                        break;
                    }
                }
            }
        });

        tx
    }
}

async fn run_job(
    handler: &CommandHandler,
    transport: &dyn MessagingTransport,
    sender: &RecipientId,
    (chat, command): Job,
) {
    for reply in handler.handle(sender, command).await {
        if let Err(e) = transport.send(&chat, &reply, Formatting::RichText).await {
            warn!(%chat, error = %e, "failed to send reply");
        }
    }
}
