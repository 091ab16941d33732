//! Long-lived admin client for the proxy's gRPC control socket.
//!
//! The channel lives behind a read/write lock: in-flight calls clone it under
//! the read lock and proceed concurrently, while connect/disconnect take the
//! write lock. Everything except connect/disconnect/close requires the
//! channel to be up and fails with `NotReady` otherwise.

use std::time::Duration;

use proxops_common::{
    api::ApiUser,
    error::Error,
    state::{Inbound, InboundType},
    tx::Tx,
};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tonic::transport::{Channel, Endpoint};
use tracing::info;

use super::proto;

const ROLLBACK_TIMEOUT: Duration = Duration::from_secs(5);

pub struct AdminClient {
    target: String,
    inbounds: Vec<Inbound>,
    channel: RwLock<Option<Channel>>,
}

impl AdminClient {
    /// `api_listen` is the proxy's plaintext loopback control address, as
    /// parsed from the server config.
    pub fn new(api_listen: &str, inbounds: Vec<Inbound>) -> Self {
        Self {
            target: format!("http://{api_listen}"),
            inbounds,
            channel: RwLock::new(None),
        }
    }

    /// Establish the channel and wait until it is ready. Respects the
    /// caller's cancellation: dropping the future tears the half-open
    /// connection down with it.
    pub async fn connect(&self) -> Result<(), Error> {
        let mut guard = self.channel.write().await;
        if guard.is_some() {
            return Ok(());
        }

        let endpoint = Endpoint::from_shared(self.target.clone())
            .map_err(|e| Error::Config(format!("admin api target {}: {e}", self.target)))?
            .connect_timeout(Duration::from_secs(5));

        let channel = endpoint
            .connect()
            .await
            .map_err(|e| Error::Grpc(format!("connect {}: {e}", self.target)))?;

        info!("admin channel connected to {}", self.target);
        *guard = Some(channel);
        Ok(())
    }

    pub async fn disconnect(&self) -> Result<(), Error> {
        let mut guard = self.channel.write().await;
        if guard.take().is_some() {
            info!("admin channel disconnected");
        }
        Ok(())
    }

    pub async fn close(&self) -> Result<(), Error> {
        self.disconnect().await
    }

    async fn channel(&self) -> Result<Channel, Error> {
        self.channel.read().await.clone().ok_or(Error::NotReady)
    }

    /// Liveness probe against the stats service.
    pub async fn ping(&self) -> Result<(), Error> {
        let channel = self.channel().await?;
        let mut client = proto::StatsServiceClient::new(channel);
        client
            .get_sys_stats(proto::SysStatsRequest {})
            .await
            .map_err(|e| Error::Grpc(format!("ping call: {}", e.message())))?;
        Ok(())
    }

    /// Apply one transactional batch of user edits across every inbound.
    pub async fn edit_users(&self, add: &[ApiUser], remove: &[ApiUser]) -> Result<(), Error> {
        let channel = self.channel().await?;
        let admin = GrpcInboundAdmin { channel };
        edit_users_with(admin, &self.inbounds, add, remove).await
    }
}

/// One add/remove sub-step against a single inbound. Factored out of the
/// transport so the transactional plan can be exercised against a mock. The
/// returned futures must be `Send`: rollback steps run on a spawned task.
pub trait InboundAdmin {
    fn add_user(
        &self,
        inbound: &Inbound,
        user: &ApiUser,
    ) -> impl std::future::Future<Output = Result<(), Error>> + Send;
    fn remove_user(
        &self,
        inbound: &Inbound,
        user: &ApiUser,
    ) -> impl std::future::Future<Output = Result<(), Error>> + Send;
}

/// Enumerate inbound × user × operation steps in input order and run them as
/// a transaction: the first failure rolls the committed steps back in reverse
/// under the bounded rollback budget.
pub async fn edit_users_with<A>(
    admin: A,
    inbounds: &[Inbound],
    add: &[ApiUser],
    remove: &[ApiUser],
) -> Result<(), Error>
where
    A: InboundAdmin + Clone + Send + Sync + 'static,
{
    let mut tx = Tx::new().with_rollback_timeout(ROLLBACK_TIMEOUT);

    for inbound in inbounds.iter().filter(|i| i.is_supported()) {
        for user in add {
            let (do_admin, do_inbound, do_user) = (admin.clone(), inbound.clone(), user.clone());
            let (un_admin, un_inbound, un_user) = (admin.clone(), inbound.clone(), user.clone());
            tx.add_with_undo(
                move || async move { do_admin.add_user(&do_inbound, &do_user).await },
                move || async move { un_admin.remove_user(&un_inbound, &un_user).await },
            );
        }
        for user in remove {
            let (do_admin, do_inbound, do_user) = (admin.clone(), inbound.clone(), user.clone());
            let (un_admin, un_inbound, un_user) = (admin.clone(), inbound.clone(), user.clone());
            tx.add_with_undo(
                move || async move { do_admin.remove_user(&do_inbound, &do_user).await },
                move || async move { un_admin.add_user(&un_inbound, &un_user).await },
            );
        }
    }

    tx.run(&CancellationToken::new()).await
}

#[derive(Clone)]
struct GrpcInboundAdmin {
    channel: Channel,
}

impl InboundAdmin for GrpcInboundAdmin {
    async fn add_user(&self, inbound: &Inbound, user: &ApiUser) -> Result<(), Error> {
        let account = to_vless_account(inbound.ty, user)?;
        let proto_user = proto::User {
            level: 0,
            email: user.name.clone(),
            account: Some(proto::to_typed_message(proto::VLESS_ACCOUNT_TYPE, &account)),
        };
        let operation = proto::AddUserOperation {
            user: Some(proto_user),
        };

        let result = self
            .alter_inbound(
                &inbound.tag,
                proto::to_typed_message(proto::ADD_USER_OPERATION_TYPE, &operation),
            )
            .await;

        match result {
            Ok(()) => Ok(()),
            // already present is not an error for us
            Err(message) if is_already_exists(&message, &user.name) => Ok(()),
            Err(message) => Err(Error::Grpc(format!("add user {}: {message}", user.name))),
        }
    }

    async fn remove_user(&self, inbound: &Inbound, user: &ApiUser) -> Result<(), Error> {
        let operation = proto::RemoveUserOperation {
            email: user.name.clone(),
        };

        let result = self
            .alter_inbound(
                &inbound.tag,
                proto::to_typed_message(proto::REMOVE_USER_OPERATION_TYPE, &operation),
            )
            .await;

        match result {
            Ok(()) => Ok(()),
            // not present is not an error for us
            Err(message) if is_not_found(&message, &user.name) => Ok(()),
            Err(message) => Err(Error::Grpc(format!("remove user {}: {message}", user.name))),
        }
    }
}

impl GrpcInboundAdmin {
    async fn alter_inbound(
        &self,
        tag: &str,
        operation: proto::TypedMessage,
    ) -> Result<(), String> {
        let mut client = proto::HandlerServiceClient::new(self.channel.clone());
        client
            .alter_inbound(proto::AlterInboundRequest {
                tag: tag.to_string(),
                operation: Some(operation),
            })
            .await
            .map(|_| ())
            .map_err(|status| status.message().to_string())
    }
}

fn to_vless_account(ty: InboundType, user: &ApiUser) -> Result<proto::VlessAccount, Error> {
    match ty {
        InboundType::VlessTcpReality => Ok(proto::VlessAccount {
            id: user.uuid.clone(),
            flow: "xtls-rprx-vision".to_string(),
            encryption: "none".to_string(),
        }),
        InboundType::VlessXhttp => Ok(proto::VlessAccount {
            id: user.uuid.clone(),
            flow: String::new(),
            encryption: "none".to_string(),
        }),
        InboundType::Unsupported => Err(Error::Config("unsupported inbound type".into())),
    }
}

fn is_already_exists(message: &str, name: &str) -> bool {
    message.contains(&format!("User {name} already exists"))
}

fn is_not_found(message: &str, name: &str) -> bool {
    message.contains(&format!("User {name} not found"))
}
