use std::sync::Arc;

use async_trait::async_trait;

use crate::firestore::error::{FirestoreError, FirestoreErrorCode, FirestoreResult};
use crate::firestore::remote::datastore::streaming::box_stream_future;
use crate::firestore::remote::datastore::{
    NoopTokenProvider, RetrySettings, StreamHandle, StreamingDatastore, TokenProviderArc,
};
use crate::firestore::remote::stream::{
    PersistentStream, PersistentStreamDelegate, PersistentStreamHandle, StreamKind,
};

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StreamCredentials {
    pub auth_token: Option<String>,
    pub app_check_token: Option<String>,
    pub heartbeat_header: Option<String>,
}

#[derive(Clone)]
struct StreamCredentialProvider {
    auth_provider: TokenProviderArc,
    app_check_provider: TokenProviderArc,
    heartbeat_provider: Option<TokenProviderArc>,
}

impl StreamCredentialProvider {
    fn new(
        auth_provider: TokenProviderArc,
        app_check_provider: TokenProviderArc,
        heartbeat_provider: Option<TokenProviderArc>,
    ) -> Self {
        Self {
            auth_provider,
            app_check_provider,
            heartbeat_provider,
        }
    }

    async fn fetch(&self) -> FirestoreResult<StreamCredentials> {
        let auth_token = self.auth_provider.get_token().await?;
        let app_check_token = self.app_check_provider.get_token().await?;
        let heartbeat_header = match &self.heartbeat_provider {
            Some(provider) => provider.heartbeat_header().await?,
            None => None,
        };

        Ok(StreamCredentials {
            auth_token,
            app_check_token,
            heartbeat_header,
        })
    }

    fn invalidate(&self) {
        self.auth_provider.invalidate_token();
        self.app_check_provider.invalidate_token();
        if let Some(provider) = &self.heartbeat_provider {
            provider.invalidate_token();
        }
    }
}

#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
pub trait NetworkStreamHandler: Send + Sync + 'static {
    fn label(&self) -> &'static str;
    fn should_continue(&self) -> bool;

    async fn on_open(
        &self,
        stream: Arc<dyn StreamHandle>,
        credentials: StreamCredentials,
    ) -> FirestoreResult<()>;

    async fn on_message(&self, payload: Vec<u8>) -> FirestoreResult<()>;

    async fn on_close(&self);

    async fn on_error(&self, error: FirestoreError);
}

struct NetworkStreamDelegate<H>
where
    H: NetworkStreamHandler,
{
    handler: Arc<H>,
    credentials: StreamCredentialProvider,
}

impl<H> NetworkStreamDelegate<H>
where
    H: NetworkStreamHandler,
{
    fn new(handler: Arc<H>, credentials: StreamCredentialProvider) -> Self {
        Self {
            handler,
            credentials,
        }
    }
}

impl<H> PersistentStreamDelegate for NetworkStreamDelegate<H>
where
    H: NetworkStreamHandler,
{
    fn stream_label(&self) -> &'static str {
        self.handler.label()
    }

    fn on_stream_open(
        &self,
        stream: Arc<dyn StreamHandle>,
    ) -> crate::firestore::remote::datastore::StreamingFuture<'_, FirestoreResult<()>> {
        let handler = Arc::clone(&self.handler);
        let credentials = self.credentials.clone();
        box_stream_future(async move {
            let creds = credentials.fetch().await?;
            handler.on_open(stream, creds).await
        })
    }

    fn on_stream_message(
        &self,
        message: Vec<u8>,
    ) -> crate::firestore::remote::datastore::StreamingFuture<'_, FirestoreResult<()>> {
        let handler = Arc::clone(&self.handler);
        box_stream_future(async move { handler.on_message(message).await })
    }

    fn on_stream_close(&self) -> crate::firestore::remote::datastore::StreamingFuture<'_, ()> {
        let handler = Arc::clone(&self.handler);
        box_stream_future(async move { handler.on_close().await })
    }

    fn on_stream_error(
        &self,
        error: FirestoreError,
    ) -> crate::firestore::remote::datastore::StreamingFuture<'_, ()> {
        let handler = Arc::clone(&self.handler);
        let credentials = self.credentials.clone();
        box_stream_future(async move {
            if error.code == FirestoreErrorCode::Unauthenticated {
                credentials.invalidate();
            }
            handler.on_error(error).await;
        })
    }

    fn should_continue(&self) -> bool {
        self.handler.should_continue()
    }
}

#[derive(Clone)]
pub struct NetworkLayer {
    datastore: Arc<dyn StreamingDatastore>,
    credentials: StreamCredentialProvider,
    retry: RetrySettings,
}

impl NetworkLayer {
    pub fn builder(
        datastore: Arc<dyn StreamingDatastore>,
        auth_provider: TokenProviderArc,
    ) -> NetworkLayerBuilder {
        NetworkLayerBuilder::new(datastore, auth_provider)
    }

    pub fn listen<H>(&self, handler: Arc<H>) -> PersistentStreamHandle
    where
        H: NetworkStreamHandler,
    {
        self.spawn_stream(handler, StreamKind::Listen)
    }

    pub fn write<H>(&self, handler: Arc<H>) -> PersistentStreamHandle
    where
        H: NetworkStreamHandler,
    {
        self.spawn_stream(handler, StreamKind::Write)
    }

    fn spawn_stream<H>(&self, handler: Arc<H>, kind: StreamKind) -> PersistentStreamHandle
    where
        H: NetworkStreamHandler,
    {
        let delegate = Arc::new(NetworkStreamDelegate::new(
            Arc::clone(&handler),
            self.credentials.clone(),
        ));
        PersistentStream::new(
            Arc::clone(&self.datastore),
            delegate,
            self.retry.clone(),
            kind,
        )
        .start()
    }
}

pub struct NetworkLayerBuilder {
    datastore: Arc<dyn StreamingDatastore>,
    auth_provider: TokenProviderArc,
    app_check_provider: Option<TokenProviderArc>,
    heartbeat_provider: Option<TokenProviderArc>,
    retry: RetrySettings,
}

impl NetworkLayerBuilder {
    fn new(datastore: Arc<dyn StreamingDatastore>, auth_provider: TokenProviderArc) -> Self {
        Self {
            datastore,
            auth_provider,
            app_check_provider: None,
            heartbeat_provider: None,
            retry: RetrySettings::streaming_defaults(),
        }
    }

    pub fn with_app_check_provider(mut self, provider: TokenProviderArc) -> Self {
        self.app_check_provider = Some(provider);
        self
    }

    pub fn with_heartbeat_provider(mut self, provider: TokenProviderArc) -> Self {
        self.heartbeat_provider = Some(provider);
        self
    }

    pub fn with_retry(mut self, retry: RetrySettings) -> Self {
        self.retry = retry;
        self
    }

    pub fn build(self) -> NetworkLayer {
        let app_check = self
            .app_check_provider
            .unwrap_or_else(|| Arc::new(NoopTokenProvider::default()) as TokenProviderArc);
        let heartbeat_provider = self
            .heartbeat_provider
            .or_else(|| Some(Arc::clone(&app_check)));
        let credentials = StreamCredentialProvider::new(
            Arc::clone(&self.auth_provider),
            app_check,
            heartbeat_provider,
        );
        NetworkLayer {
            datastore: self.datastore,
            credentials,
            retry: self.retry,
        }
    }
}
