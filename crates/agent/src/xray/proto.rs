//! Hand-maintained mirrors of the xray-core admin API protos.
//!
//! Only the messages the daemon actually sends are defined:
//! `HandlerService.AlterInbound` with its add/remove user operations, and
//! `StatsService.GetSysStats` which doubles as a liveness ping. Field tags
//! follow the upstream `.proto` files; keeping the definitions in-tree avoids
//! a protoc step at build time.

/// `xray.common.serial.TypedMessage`
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct TypedMessage {
    #[prost(string, tag = "1")]
    pub r#type: ::prost::alloc::string::String,
    #[prost(bytes = "vec", tag = "2")]
    pub value: ::prost::alloc::vec::Vec<u8>,
}

/// `xray.common.protocol.User`
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct User {
    #[prost(uint32, tag = "1")]
    pub level: u32,
    #[prost(string, tag = "2")]
    pub email: ::prost::alloc::string::String,
    #[prost(message, optional, tag = "3")]
    pub account: ::core::option::Option<TypedMessage>,
}

/// `xray.proxy.vless.Account`
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct VlessAccount {
    #[prost(string, tag = "1")]
    pub id: ::prost::alloc::string::String,
    #[prost(string, tag = "2")]
    pub flow: ::prost::alloc::string::String,
    #[prost(string, tag = "3")]
    pub encryption: ::prost::alloc::string::String,
}

/// `xray.app.proxyman.command.AddUserOperation`
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct AddUserOperation {
    #[prost(message, optional, tag = "1")]
    pub user: ::core::option::Option<User>,
}

/// `xray.app.proxyman.command.RemoveUserOperation`
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct RemoveUserOperation {
    #[prost(string, tag = "1")]
    pub email: ::prost::alloc::string::String,
}

/// `xray.app.proxyman.command.AlterInboundRequest`
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct AlterInboundRequest {
    #[prost(string, tag = "1")]
    pub tag: ::prost::alloc::string::String,
    #[prost(message, optional, tag = "2")]
    pub operation: ::core::option::Option<TypedMessage>,
}

/// `xray.app.proxyman.command.AlterInboundResponse`
#[derive(Clone, Copy, PartialEq, ::prost::Message)]
pub struct AlterInboundResponse {}

/// `xray.app.stats.command.SysStatsRequest`
#[derive(Clone, Copy, PartialEq, ::prost::Message)]
pub struct SysStatsRequest {}

/// `xray.app.stats.command.SysStatsResponse`
#[derive(Clone, Copy, PartialEq, ::prost::Message)]
pub struct SysStatsResponse {
    #[prost(uint32, tag = "1")]
    pub num_goroutine: u32,
    #[prost(uint32, tag = "2")]
    pub num_gc: u32,
    #[prost(uint64, tag = "3")]
    pub alloc: u64,
    #[prost(uint64, tag = "4")]
    pub total_alloc: u64,
    #[prost(uint64, tag = "5")]
    pub sys: u64,
    #[prost(uint64, tag = "6")]
    pub mallocs: u64,
    #[prost(uint64, tag = "7")]
    pub frees: u64,
    #[prost(uint64, tag = "8")]
    pub live_objects: u64,
    #[prost(uint64, tag = "9")]
    pub pause_total_ns: u64,
    #[prost(uint32, tag = "10")]
    pub uptime: u32,
}

/// Pack a message into the serial envelope the proxy expects.
pub fn to_typed_message<M: prost::Message>(type_url: &str, message: &M) -> TypedMessage {
    TypedMessage {
        r#type: type_url.to_string(),
        value: message.encode_to_vec(),
    }
}

pub const ADD_USER_OPERATION_TYPE: &str = "xray.app.proxyman.command.AddUserOperation";
pub const REMOVE_USER_OPERATION_TYPE: &str = "xray.app.proxyman.command.RemoveUserOperation";
pub const VLESS_ACCOUNT_TYPE: &str = "xray.proxy.vless.Account";

/// `xray.app.proxyman.command.HandlerService` client.
#[derive(Debug, Clone)]
pub struct HandlerServiceClient {
    inner: tonic::client::Grpc<tonic::transport::Channel>,
}

impl HandlerServiceClient {
    pub fn new(channel: tonic::transport::Channel) -> Self {
        Self {
            inner: tonic::client::Grpc::new(channel),
        }
    }

    pub async fn alter_inbound(
        &mut self,
        request: AlterInboundRequest,
    ) -> Result<tonic::Response<AlterInboundResponse>, tonic::Status> {
        self.inner.ready().await.map_err(|e| {
            tonic::Status::unknown(format!("Service was not ready: {e}"))
        })?;
        let codec = tonic::codec::ProstCodec::default();
        let path = http::uri::PathAndQuery::from_static(
            "/xray.app.proxyman.command.HandlerService/AlterInbound",
        );
        self.inner
            .unary(tonic::Request::new(request), path, codec)
            .await
    }
}

/// `xray.app.stats.command.StatsService` client.
#[derive(Debug, Clone)]
pub struct StatsServiceClient {
    inner: tonic::client::Grpc<tonic::transport::Channel>,
}

impl StatsServiceClient {
    pub fn new(channel: tonic::transport::Channel) -> Self {
        Self {
            inner: tonic::client::Grpc::new(channel),
        }
    }

    pub async fn get_sys_stats(
        &mut self,
        request: SysStatsRequest,
    ) -> Result<tonic::Response<SysStatsResponse>, tonic::Status> {
        self.inner.ready().await.map_err(|e| {
            tonic::Status::unknown(format!("Service was not ready: {e}"))
        })?;
        let codec = tonic::codec::ProstCodec::default();
        let path = http::uri::PathAndQuery::from_static(
            "/xray.app.stats.command.StatsService/GetSysStats",
        );
        self.inner
            .unary(tonic::Request::new(request), path, codec)
            .await
    }
}
