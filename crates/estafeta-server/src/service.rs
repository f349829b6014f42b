use std::sync::Arc;

use estafeta_core::Manager;
use estafeta_proto::broker_server::Broker;
use estafeta_proto::convert;
use estafeta_proto::{
    AbortRequest, AbortResponse, BeginRequest, BeginResponse, CommitRequest, CommitResponse,
    GetRequest, GetResponse, ListRequest, ListResponse, PublishRequest, PublishResponse,
    PutRequest, PutResponse, RetrieveRequest, RetrieveResponse, StopRequest, StopResponse,
};
use tonic::{Request, Response, Status};
use tracing::{info, instrument};
use uuid::Uuid;

use crate::error::IntoStatus;

/// gRPC service wrapping the queue manager. Manager operations block
/// on disk IO, so every call hops to the blocking pool.
pub struct BrokerService {
    manager: Arc<Manager>,
    stop: tokio::sync::mpsc::Sender<()>,
}

impl BrokerService {
    pub fn new(manager: Arc<Manager>, stop: tokio::sync::mpsc::Sender<()>) -> Self {
        Self { manager, stop }
    }
}

fn parse_tid(tid: Option<&str>) -> Result<Option<Uuid>, Status> {
    match tid {
        None => Ok(None),
        Some(text) => Uuid::parse_str(text)
            .map(Some)
            .map_err(|_| Status::invalid_argument(format!("malformed transaction id: {text:?}"))),
    }
}

fn parse_required_tid(tid: &str) -> Result<Uuid, Status> {
    Uuid::parse_str(tid)
        .map_err(|_| Status::invalid_argument(format!("malformed transaction id: {tid:?}")))
}

async fn blocking<T, F>(task: F) -> Result<T, Status>
where
    T: Send + 'static,
    F: FnOnce() -> estafeta_core::Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(task)
        .await
        .map_err(|_| Status::internal("manager task panicked"))?
        .map_err(IntoStatus::into_status)
}

#[tonic::async_trait]
impl Broker for BrokerService {
    #[instrument(skip(self, request))]
    async fn put(&self, request: Request<PutRequest>) -> Result<Response<PutResponse>, Status> {
        let req = request.into_inner();
        let headers = convert::header_map_from_proto(req.headers)
            .map_err(IntoStatus::into_status)?;
        let tid = parse_tid(req.tid.as_deref())?;

        let manager = Arc::clone(&self.manager);
        let id = blocking(move || manager.put(&req.queue, req.body, headers, tid)).await?;
        Ok(Response::new(PutResponse { id: id.to_string() }))
    }

    #[instrument(skip(self, request))]
    async fn publish(
        &self,
        request: Request<PublishRequest>,
    ) -> Result<Response<PublishResponse>, Status> {
        let req = request.into_inner();
        let headers = convert::header_map_from_proto(req.headers)
            .map_err(IntoStatus::into_status)?;
        let tid = parse_tid(req.tid.as_deref())?;

        let manager = Arc::clone(&self.manager);
        let id = blocking(move || manager.publish(&req.topic, req.body, headers, tid)).await?;
        Ok(Response::new(PublishResponse { id: id.to_string() }))
    }

    #[instrument(skip(self, request))]
    async fn list(&self, request: Request<ListRequest>) -> Result<Response<ListResponse>, Status> {
        let req = request.into_inner();

        let manager = Arc::clone(&self.manager);
        let headers = blocking(move || manager.list(&req.queue)).await?;
        Ok(Response::new(ListResponse {
            headers: headers.iter().map(convert::headers_to_proto).collect(),
        }))
    }

    #[instrument(skip(self, request))]
    async fn get(&self, request: Request<GetRequest>) -> Result<Response<GetResponse>, Status> {
        let req = request.into_inner();
        let selector = req
            .selector
            .map(convert::selector_from_proto)
            .transpose()
            .map_err(IntoStatus::into_status)?;
        let tid = parse_tid(req.tid.as_deref())?;

        let manager = Arc::clone(&self.manager);
        let message =
            blocking(move || manager.get(&req.queue, selector.as_ref(), tid)).await?;
        Ok(Response::new(GetResponse {
            message: message.as_ref().map(convert::message_to_proto),
        }))
    }

    #[instrument(skip(self, request))]
    async fn retrieve(
        &self,
        request: Request<RetrieveRequest>,
    ) -> Result<Response<RetrieveResponse>, Status> {
        let req = request.into_inner();
        let seen = match req.seen_id.as_deref() {
            None => None,
            Some(text) => Some(Uuid::parse_str(text).map_err(|_| {
                Status::invalid_argument(format!("malformed seen id: {text:?}"))
            })?),
        };
        let selector = req
            .selector
            .map(convert::selector_from_proto)
            .transpose()
            .map_err(IntoStatus::into_status)?;
        let tid = parse_tid(req.tid.as_deref())?;

        let manager = Arc::clone(&self.manager);
        let message =
            blocking(move || manager.retrieve(&req.topic, seen, selector.as_ref(), tid)).await?;
        Ok(Response::new(RetrieveResponse {
            message: message.as_ref().map(convert::message_to_proto),
        }))
    }

    #[instrument(skip(self, request))]
    async fn begin(
        &self,
        request: Request<BeginRequest>,
    ) -> Result<Response<BeginResponse>, Status> {
        let req = request.into_inner();
        let timeout = std::time::Duration::from_secs(req.timeout_secs);

        let manager = Arc::clone(&self.manager);
        let tid = blocking(move || manager.begin(timeout)).await?;
        Ok(Response::new(BeginResponse {
            tid: tid.to_string(),
        }))
    }

    #[instrument(skip(self, request))]
    async fn commit(
        &self,
        request: Request<CommitRequest>,
    ) -> Result<Response<CommitResponse>, Status> {
        let tid = parse_required_tid(&request.into_inner().tid)?;

        let manager = Arc::clone(&self.manager);
        blocking(move || manager.commit(tid)).await?;
        Ok(Response::new(CommitResponse {}))
    }

    #[instrument(skip(self, request))]
    async fn abort(
        &self,
        request: Request<AbortRequest>,
    ) -> Result<Response<AbortResponse>, Status> {
        let tid = parse_required_tid(&request.into_inner().tid)?;

        let manager = Arc::clone(&self.manager);
        blocking(move || manager.abort(tid)).await?;
        Ok(Response::new(AbortResponse {}))
    }

    #[instrument(skip(self, _request))]
    async fn stop(&self, _request: Request<StopRequest>) -> Result<Response<StopResponse>, Status> {
        info!("stop requested over rpc");
        let _ = self.stop.send(()).await;
        Ok(Response::new(StopResponse {}))
    }
}
