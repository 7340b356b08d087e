//! Channel-mode host: the bridge behind a sandboxed game surface.
//!
//! One task per session. Inbound frames are dispatched to the authority;
//! authority events are forwarded as host messages, each carrying the
//! originating client id in the envelope so the surface can correlate even
//! when it missed the submission ack.

use crate::authority::Bridge;
use crate::events::{ErrorEvent, OutcomeEvent, SubmissionEvent};
use reelhouse_types::{ChannelEnd, ClientId, Message};
use tracing::{debug, info, warn};

/// Host side of one game-surface session.
pub struct BridgeHost {
    bridge: Bridge,
    channel: ChannelEnd,
}

impl BridgeHost {
    pub fn new(bridge: Bridge, channel: ChannelEnd) -> Self {
        Self { bridge, channel }
    }

    /// Serve the session until the surface sends `Exit` or drops its end.
    pub async fn run(self) {
        let Self {
            bridge,
            mut channel,
        } = self;
        let mut submissions = bridge.subscribe_submissions();
        let mut outcomes = bridge.subscribe_outcomes();
        let mut balances = bridge.subscribe_balances();
        let mut errors = bridge.subscribe_errors();

        loop {
            // Select arms only produce a step; all channel and bridge work
            // happens below, outside the borrow of the recv future.
            let step = tokio::select! {
                maybe = channel.recv() => match maybe {
                    Some(envelope) => Step::Inbound(envelope.message),
                    None => Step::SurfaceGone,
                },
                Some(SubmissionEvent { client_id, engine_id }) = submissions.recv() => {
                    Step::Forward(Message::SpinSubmitted { id: engine_id }, Some(client_id))
                }
                Some(OutcomeEvent { client_id, engine_id, outcome }) = outcomes.recv() => {
                    Step::Forward(Message::SpinOutcome { id: engine_id, outcome }, Some(client_id))
                }
                Some(report) = balances.recv() => {
                    Step::Forward(Message::BalanceUpdate(report), None)
                }
                Some(ErrorEvent { client_id, message }) = errors.recv() => {
                    Step::Forward(Message::Error { message }, client_id)
                }
            };
            let sent = match step {
                Step::SurfaceGone => {
                    debug!("game surface dropped its channel end");
                    break;
                }
                Step::Inbound(message) => {
                    match handle_message(&bridge, &channel, message).await {
                        Flow::Continue => true,
                        Flow::Stop => break,
                        Flow::SendFailed => false,
                    }
                }
                Step::Forward(message, request_id) => {
                    channel.send(message, request_id).is_ok()
                }
            };
            if !sent {
                debug!("channel closed mid-send");
                break;
            }
        }
        info!("bridge host session ended");
    }
}

enum Step {
    Inbound(Message),
    Forward(Message, Option<ClientId>),
    SurfaceGone,
}

enum Flow {
    Continue,
    Stop,
    SendFailed,
}

async fn handle_message(bridge: &Bridge, channel: &ChannelEnd, message: Message) -> Flow {
    let sent = match message {
        Message::Init => {
            info!("game surface initialized");
            let config_ok = channel.send(Message::Config(bridge.config()), None).is_ok();
            let report = bridge.refresh_balance().await;
            let balance_ok = channel.send(Message::BalanceUpdate(report), None).is_ok();
            config_ok && balance_ok && send_credits(bridge, channel).await
        }
        Message::GetConfig => channel.send(Message::Config(bridge.config()), None).is_ok(),
        Message::GetBalance => {
            // Poll replies are authoritative: hit the chain, not the cache.
            let report = bridge.refresh_balance().await;
            channel.send(Message::BalanceUpdate(report), None).is_ok()
        }
        Message::GetCreditBalance => send_credits(bridge, channel).await,
        Message::GetSpinQueue => channel
            .send(
                Message::SpinQueue {
                    entries: bridge.snapshot(),
                },
                None,
            )
            .is_ok(),
        Message::SpinRequest(request) => match bridge.submit_spin(request) {
            Ok(()) => true,
            Err(err) => {
                warn!(client_id = %request.client_id, error = %err, "spin rejected");
                send_error(channel, &err.to_string(), Some(request.client_id))
            }
        },
        Message::Exit => {
            bridge.close();
            return Flow::Stop;
        }
        other => {
            // Host-bound kinds echoed back at us; drop them.
            warn!(kind = other.kind(), "ignoring message with host-bound kind");
            true
        }
    };
    if sent {
        Flow::Continue
    } else {
        Flow::SendFailed
    }
}

async fn send_credits(bridge: &Bridge, channel: &ChannelEnd) -> bool {
    match bridge.credits().await {
        Ok(credits) => channel.send(Message::CreditBalance(credits), None).is_ok(),
        Err(err) => {
            warn!(error = %err, "credit balance fetch failed");
            send_error(channel, &err.to_string(), None)
        }
    }
}

fn send_error(channel: &ChannelEnd, message: &str, request_id: Option<ClientId>) -> bool {
    channel
        .send(
            Message::Error {
                message: message.to_owned(),
            },
            request_id,
        )
        .is_ok()
}
