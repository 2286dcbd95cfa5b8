//! The Unary and Stream Forwarders (spec.md §4.5, §4.6).
//!
//! In the original design these dispatch on a method name and then
//! type-assert the request into the method's known type (§9, "Typed
//! dispatch over opaque requests"). Tonic already gives each RPC its own
//! statically typed trait method, so that dispatch is done by the compiler:
//! each `SwitchControl` method below calls one of these two generics bound
//! to its own `Req`/`Resp`, and a request-type mismatch is a compile error
//! rather than a `Status::internal` at runtime.

use futures::{Stream, StreamExt};
use std::future::Future;
use std::pin::Pin;
use tokio::sync::{mpsc, oneshot};
use tokio_stream::wrappers::ReceiverStream;
use tonic::{Request, Response, Status};

/// Forwards a single request/response pair to the DPU and returns the
/// DPU's response verbatim (spec.md §4.5). Transport-level errors are
/// returned unchanged so the caller sees the peer's status.
pub async fn forward_unary<Req, Resp, F, Fut>(
    request: Request<Req>,
    call: F,
) -> Result<Response<Resp>, Status>
where
    F: FnOnce(Request<Req>) -> Fut,
    Fut: Future<Output = Result<Response<Resp>, Status>>,
{
    call(request).await
}

/// Channel depth for the inbound-to-outbound relay pipe. Small: the
/// forwarder is a relay, not a buffer.
const RELAY_BUFFER: usize = 8;

/// Forwards a client-streaming call to the DPU (spec.md §4.6): messages
/// received from `inbound` are relayed in order onto a freshly opened
/// client stream, which is half-closed once `inbound` ends, and the DPU's
/// single response is returned.
///
/// `call` receives the outbound stream already wired up; it is expected to
/// issue the client-streaming RPC (e.g. `SwitchControlClient::upload_file`)
/// and await its single response.
pub async fn forward_stream<Req, Resp, S, F, Fut>(
    mut inbound: S,
    call: F,
) -> Result<Response<Resp>, Status>
where
    Req: Send + 'static,
    S: Stream<Item = Result<Req, Status>> + Unpin + Send + 'static,
    F: FnOnce(Request<Pin<Box<dyn Stream<Item = Req> + Send>>>) -> Fut,
    Fut: Future<Output = Result<Response<Resp>, Status>>,
{
    let (tx, rx) = mpsc::channel(RELAY_BUFFER);
    let (pump_done_tx, pump_done_rx) = oneshot::channel::<Result<(), Status>>();

    // One task relays inbound -> outbound in order; it reports its outcome
    // on a one-shot channel once the inbound side reaches end-of-stream or
    // errors (spec.md §4.6 step 2).
    tokio::spawn(async move {
        loop {
            match inbound.next().await {
                Some(Ok(msg)) => {
                    if tx.send(msg).await.is_err() {
                        // Outbound side gave up (e.g. the call future was
                        // dropped); nothing more to relay.
                        let _ = pump_done_tx.send(Ok(()));
                        return;
                    }
                }
                None => {
                    // Clean end-of-stream: dropping `tx` closes the
                    // outbound stream (the close-send step).
                    drop(tx);
                    let _ = pump_done_tx.send(Ok(()));
                    return;
                }
                Some(Err(status)) => {
                    drop(tx);
                    let _ = pump_done_tx.send(Err(status));
                    return;
                }
            }
        }
    });

    let outbound: Pin<Box<dyn Stream<Item = Req> + Send>> =
        Box::pin(ReceiverStream::new(rx));
    let call_fut = call(Request::new(outbound));
    tokio::pin!(call_fut);

    tokio::select! {
        pump_result = pump_done_rx => {
            match pump_result {
                Ok(Ok(())) => call_fut.await,
                Ok(Err(status)) => Err(status),
                Err(_) => Err(Status::internal("stream relay task terminated unexpectedly")),
            }
        }
        call_result = &mut call_fut => call_result,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;

    #[tokio::test]
    async fn unary_forward_returns_call_result_unchanged() {
        let resp = forward_unary(Request::new(7u32), |req| async move {
            Ok(Response::new(req.into_inner() * 2))
        })
        .await
        .unwrap();
        assert_eq!(resp.into_inner(), 14);
    }

    #[tokio::test]
    async fn unary_forward_propagates_errors() {
        let err = forward_unary(Request::new(()), |_req: Request<()>| async move {
            Err::<Response<()>, _>(Status::unavailable("down"))
        })
        .await
        .unwrap_err();
        assert_eq!(err.code(), tonic::Code::Unavailable);
    }

    fn stream_of(values: Vec<u32>) -> impl Stream<Item = Result<u32, Status>> + Unpin + Send + 'static {
        stream::iter(values.into_iter().map(Ok))
    }

    #[tokio::test]
    async fn stream_forward_relays_all_messages_in_order() {
        let received = std::sync::Arc::new(parking_lot::Mutex::new(Vec::new()));
        let received2 = received.clone();
        let resp = forward_stream(stream_of(vec![1, 2, 3]), move |req| {
            let received = received2.clone();
            async move {
                use futures::StreamExt;
                let mut items = req.into_inner();
                let mut sum = 0u32;
                while let Some(v) = items.next().await {
                    received.lock().push(v);
                    sum += v;
                }
                Ok(Response::new(sum))
            }
        })
        .await
        .unwrap();
        assert_eq!(resp.into_inner(), 6);
        assert_eq!(*received.lock(), vec![1, 2, 3]);
    }
}
