use super::events::{ChaincodeEvent, Registration};
use super::invoke::{execute_handler, query_handler, ClientContext, Handler, RequestContext};
use super::request::{Request, RequestOptions, Response};
use super::{ChannelContext, InvocationPhase};
use crate::config::EndpointConfig;
use crate::context::CallContext;
use crate::discovery::{Greylist, PeerFilter};
use crate::peer::Peer;
use crate::status::{ClientCode, Status};
use crate::timeouts::TimeoutType;
use crate::util::ClientError;
use log::{debug, warn};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Queries and executes chaincode on one channel.
///
/// Every invocation runs under its own deadline. Failed attempts are retried
/// per the caller's retry policy, with the failing peers greylisted so that
/// selection skips them on the next attempt.
pub struct ChannelClient {
    context: ChannelContext,
    greylist: Arc<Greylist>,
}

impl ChannelClient {
    pub fn new(context: ChannelContext) -> Self {
        let expiry = context
            .endpoint_config()
            .timeout_or_default(TimeoutType::DiscoveryGreylistExpiry);
        Self {
            context,
            greylist: Arc::new(Greylist::new(expiry)),
        }
    }

    pub fn channel_id(&self) -> &str {
        self.context.channel_id()
    }

    pub fn greylist(&self) -> &Arc<Greylist> {
        &self.greylist
    }

    /// Evaluates chaincode without submitting a transaction.
    pub async fn query(
        &self,
        request: Request,
        options: RequestOptions,
    ) -> Result<Response, ClientError> {
        let options = add_default_timeout(
            self.context.endpoint_config(),
            TimeoutType::Query,
            options,
        );
        self.invoke_handler(Arc::new(query_handler()), request, options)
            .await
    }

    /// Endorses, submits and waits for the transaction to commit.
    pub async fn execute(
        &self,
        request: Request,
        options: RequestOptions,
    ) -> Result<Response, ClientError> {
        let options = add_default_timeout(
            self.context.endpoint_config(),
            TimeoutType::Execute,
            options,
        );
        self.invoke_handler(Arc::new(execute_handler()), request, options)
            .await
    }

    /// Runs `handler` under the invocation deadline, retrying whole attempts
    /// as the retry policy in `options` allows.
    pub async fn invoke_handler(
        &self,
        handler: Arc<dyn Handler>,
        request: Request,
        options: RequestOptions,
    ) -> Result<Response, ClientError> {
        if request.chaincode_id.is_empty() || request.fcn.is_empty() {
            return Err(ClientError::InvalidRequest(
                "chaincode id and function are required".into(),
            ));
        }

        let timeout = options.timeout(TimeoutType::Execute).unwrap_or_else(|| {
            self.context
                .endpoint_config()
                .timeout_or_default(TimeoutType::Execute)
        });
        let ctx = match &options.parent_context {
            Some(parent) => parent.child_with_timeout(timeout),
            None => CallContext::with_timeout(timeout),
        }
        .with_timeout_overrides(options.timeouts.clone());

        let filter = self.selection_filter(&options);
        debug!(
            "event=invoke_phase phase={} channel={} chaincode={} fcn={} timeout_ms={}",
            InvocationPhase::Prepared,
            self.context.channel_id(),
            request.chaincode_id,
            request.fcn,
            timeout.as_millis()
        );

        let attempt = Attempt {
            handler,
            context: self.context.clone(),
            request,
            options,
            ctx: ctx.clone(),
            filter,
            greylist: self.greylist.clone(),
        };
        let mut task = tokio::spawn(attempt.run());
        let outcome = tokio::select! {
            joined = &mut task => match joined {
                Ok(outcome) => outcome,
                Err(err) => Err(Status::client(
                    ClientCode::Unknown,
                    format!("invocation task failed: {err}"),
                )
                .into()),
            },
            reason = ctx.done() => {
                task.abort();
                warn!(
                    "event=invoke_phase phase={} channel={} reason={:?}",
                    InvocationPhase::TimedOut,
                    self.context.channel_id(),
                    reason
                );
                Err(Status::timeout("request timed out or been cancelled").into())
            }
        };
        ctx.cancel();
        outcome
    }

    /// Streams chaincode events of `chaincode_id` whose name matches
    /// `event_filter`.
    pub fn register_chaincode_event(
        &self,
        chaincode_id: &str,
        event_filter: &str,
    ) -> Result<(Registration, mpsc::UnboundedReceiver<ChaincodeEvent>), ClientError> {
        self.context
            .event_service()
            .register_chaincode_event(chaincode_id, event_filter)
    }

    pub fn unregister_chaincode_event(&self, registration: Registration) {
        self.context.event_service().unregister(registration);
    }

    fn selection_filter(&self, options: &RequestOptions) -> PeerFilter {
        let greylist = self.greylist.clone();
        let target_filter = options.target_filter.clone();
        Arc::new(move |peer: &dyn Peer| {
            greylist.accept(peer)
                && target_filter
                    .as_ref()
                    .map_or(true, |filter| filter.accept(peer))
        })
    }
}

/// Stores the default timeout for `kind` when the caller set none. The
/// value always lands in the `Execute` slot, the only one the pipeline
/// reads, so a query without a `Query` timeout runs under the default query
/// timeout even when the caller set an `Execute` timeout.
fn add_default_timeout(
    config: &EndpointConfig,
    kind: TimeoutType,
    mut options: RequestOptions,
) -> RequestOptions {
    if options.timeout(kind).is_none() {
        options
            .timeouts
            .insert(TimeoutType::Execute, config.timeout_or_default(kind));
    }
    options
}

/// Resolves the collaborators shared by every attempt. Membership may run a
/// blocking configuration lookup.
fn client_context(context: &ChannelContext) -> Result<ClientContext, ClientError> {
    let transactor = context
        .transactor_factory()
        .create_channel_transactor(context.channel_id())?;
    Ok(ClientContext {
        selection: context.selection().clone(),
        discovery: context.discovery().clone(),
        membership: context.membership()?,
        transactor,
        event_service: context.event_service().clone(),
    })
}

/// The retry unit, owned by the spawned invocation task.
struct Attempt {
    handler: Arc<dyn Handler>,
    context: ChannelContext,
    request: Request,
    options: RequestOptions,
    ctx: CallContext,
    filter: PeerFilter,
    greylist: Arc<Greylist>,
}

impl Attempt {
    async fn run(self) -> Result<Response, ClientError> {
        // Off the async workers, and inside the deadline race.
        let context = self.context.clone();
        let client_ctx = tokio::task::spawn_blocking(move || client_context(&context))
            .await
            .map_err(|err| {
                Status::client(
                    ClientCode::Unknown,
                    format!("client context resolution failed: {err}"),
                )
            })??;
        let mut retry = self.options.retry.as_ref().map(|policy| policy.handle());
        let mut attempt = 1usize;
        loop {
            debug!(
                "event=invoke_phase phase={} chaincode={} attempt={}",
                InvocationPhase::Dispatching,
                self.request.chaincode_id,
                attempt
            );
            let mut request_ctx = RequestContext::new(
                self.request.clone(),
                self.options.clone(),
                self.ctx.clone(),
                self.filter.clone(),
            );
            self.handler
                .handle(&mut request_ctx, &client_ctx)
                .await;
            let err = match request_ctx.into_outcome() {
                Ok(response) => {
                    debug!(
                        "event=invoke_phase phase={} chaincode={} attempt={} tx_id={}",
                        InvocationPhase::Completed,
                        self.request.chaincode_id,
                        attempt,
                        response.transaction_id
                    );
                    return Ok(response);
                }
                Err(err) => err,
            };

            let delay = match retry.as_mut().and_then(|handle| handle.next_retry(&err)) {
                Some(delay) => delay,
                None => return Err(err),
            };
            self.greylist.greylist(&err);
            warn!(
                "event=invoke_phase phase={} chaincode={} attempt={} delay_ms={} error={}",
                InvocationPhase::Retrying,
                self.request.chaincode_id,
                attempt,
                delay.as_millis(),
                err
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn query_default_timeout_lands_in_execute_slot() {
        let config =
            EndpointConfig::default().with_timeout(TimeoutType::Query, Duration::from_secs(7));
        let options =
            RequestOptions::new().with_timeout(TimeoutType::Execute, Duration::from_secs(1));
        let options = add_default_timeout(&config, TimeoutType::Query, options);
        assert_eq!(
            options.timeout(TimeoutType::Execute),
            Some(Duration::from_secs(7))
        );
        assert_eq!(options.timeout(TimeoutType::Query), None);
    }

    #[test]
    fn caller_timeout_is_kept() {
        let config = EndpointConfig::default();
        let options = RequestOptions::new()
            .with_timeout(TimeoutType::Query, Duration::from_secs(2))
            .with_timeout(TimeoutType::Execute, Duration::from_secs(3));
        let options = add_default_timeout(&config, TimeoutType::Query, options);
        assert_eq!(
            options.timeout(TimeoutType::Execute),
            Some(Duration::from_secs(3))
        );

        let options = add_default_timeout(&config, TimeoutType::Execute, RequestOptions::new());
        assert_eq!(
            options.timeout(TimeoutType::Execute),
            Some(TimeoutType::Execute.default_timeout())
        );
    }
}
