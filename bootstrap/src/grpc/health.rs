//! grpc.health.v1.Health 健康检查服务
//!
//! 消息为手写的 prost 类型，同时实现 serde，供 HTTP 网关以 JSON 暴露。

use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::{Arc, RwLock};
use std::task::{Context, Poll};

use futures::future::BoxFuture;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use tonic::codec::ProstCodec;
use tonic::server::{Grpc, NamedService, UnaryService};
use tonic::{Request, Response, Status};

use crate::hooks::status_response;
use crate::interceptor::{GrpcRequest, GrpcResponse};
use crate::json::enumeration;

pub const HEALTH_CHECK_PATH: &str = "/grpc.health.v1.Health/Check";

/// Health check request
#[derive(Clone, PartialEq, prost::Message, Serialize, Deserialize)]
pub struct HealthCheckRequest {
    #[prost(string, tag = "1")]
    #[serde(default)]
    pub service: String,
}

/// Health check response
#[derive(Clone, PartialEq, prost::Message, Serialize, Deserialize)]
pub struct HealthCheckResponse {
    #[prost(enumeration = "ServingStatus", tag = "1")]
    #[serde(
        default,
        serialize_with = "serialize_status",
        deserialize_with = "deserialize_status"
    )]
    pub status: i32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
#[repr(i32)]
pub enum ServingStatus {
    Unknown = 0,
    Serving = 1,
    NotServing = 2,
    ServiceUnknown = 3,
}

impl ServingStatus {
    pub fn as_str_name(&self) -> &'static str {
        match self {
            Self::Unknown => "UNKNOWN",
            Self::Serving => "SERVING",
            Self::NotServing => "NOT_SERVING",
            Self::ServiceUnknown => "SERVICE_UNKNOWN",
        }
    }

    pub fn from_str_name(name: &str) -> Option<Self> {
        match name {
            "UNKNOWN" => Some(Self::Unknown),
            "SERVING" => Some(Self::Serving),
            "NOT_SERVING" => Some(Self::NotServing),
            "SERVICE_UNKNOWN" => Some(Self::ServiceUnknown),
            _ => None,
        }
    }
}

fn serialize_status<S: Serializer>(value: &i32, serializer: S) -> Result<S::Ok, S::Error> {
    let name = ServingStatus::try_from(*value)
        .ok()
        .map(|status| status.as_str_name());
    enumeration::serialize(*value, name, serializer)
}

fn deserialize_status<'de, D: Deserializer<'de>>(deserializer: D) -> Result<i32, D::Error> {
    enumeration::deserialize(deserializer, |name| {
        ServingStatus::from_str_name(name).map(|status| status as i32)
    })
}

/// Health service trait
#[async_trait::async_trait]
pub trait Health: Send + Sync + 'static {
    async fn check(
        &self,
        request: Request<HealthCheckRequest>,
    ) -> Result<Response<HealthCheckResponse>, Status>;
}

/// 按服务名记录状态，空服务名表示整个服务器
#[derive(Debug, Default)]
pub struct HealthReporter {
    statuses: RwLock<HashMap<String, ServingStatus>>,
}

impl HealthReporter {
    pub fn new() -> Self {
        let reporter = Self::default();
        reporter.set_serving_status("", ServingStatus::Serving);
        reporter
    }

    pub fn set_serving_status(&self, service: &str, status: ServingStatus) {
        self.statuses
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(service.to_string(), status);
    }

    pub fn status(&self, service: &str) -> Option<ServingStatus> {
        self.statuses
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(service)
            .copied()
    }
}

#[async_trait::async_trait]
impl Health for HealthReporter {
    async fn check(
        &self,
        request: Request<HealthCheckRequest>,
    ) -> Result<Response<HealthCheckResponse>, Status> {
        let service = &request.get_ref().service;
        match self.status(service) {
            Some(status) => Ok(Response::new(HealthCheckResponse {
                status: status as i32,
            })),
            None => Err(Status::not_found(format!("unknown service {}", service))),
        }
    }
}

struct CheckSvc<T>(Arc<T>);

impl<T: Health> UnaryService<HealthCheckRequest> for CheckSvc<T> {
    type Response = HealthCheckResponse;
    type Future = BoxFuture<'static, Result<Response<HealthCheckResponse>, Status>>;

    fn call(&mut self, request: Request<HealthCheckRequest>) -> Self::Future {
        let inner = self.0.clone();
        Box::pin(async move { inner.check(request).await })
    }
}

/// tonic 服务包装
#[derive(Debug)]
pub struct HealthServer<T> {
    inner: Arc<T>,
}

impl<T> HealthServer<T> {
    pub fn new(inner: T) -> Self {
        Self::from_arc(Arc::new(inner))
    }

    pub fn from_arc(inner: Arc<T>) -> Self {
        Self { inner }
    }
}

impl<T> Clone for HealthServer<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T: Health> tower::Service<GrpcRequest> for HealthServer<T> {
    type Response = GrpcResponse;
    type Error = Infallible;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: GrpcRequest) -> Self::Future {
        match req.uri().path() {
            HEALTH_CHECK_PATH => {
                let inner = self.inner.clone();
                Box::pin(async move {
                    let mut grpc = Grpc::new(ProstCodec::default());
                    Ok(grpc.unary(CheckSvc(inner), req).await)
                })
            }
            path => {
                let status = Status::unimplemented(format!("unknown method {}", path));
                let response = status_response(&status);
                Box::pin(async move { Ok(response) })
            }
        }
    }
}

impl<T> NamedService for HealthServer<T> {
    const NAME: &'static str = "grpc.health.v1.Health";
}
