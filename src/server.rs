//! gRPC server for the Hemmer provider protocol.
//!
//! [`ProviderService`] is the JSON-level view of the protocol that
//! [`SquadcastProvider`](crate::SquadcastProvider) implements. [`serve`] binds
//! a local port, prints the handshake line the host waits for and serves the
//! protocol until SIGTERM or SIGINT.
//!
//! # Shutdown
//!
//! On a shutdown signal the server stops accepting connections and gives
//! in-flight requests [`ServeOptions::shutdown_timeout`] to finish. The
//! provider's `stop()` runs afterwards in every case.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio_stream::wrappers::TcpListenerStream;
use tonic::transport::Server;
use tonic::{Request, Response, Status};
use tracing::{debug, error, info, instrument, warn};

use crate::error::ProviderError;
use crate::generated as proto;
use crate::schema::{
    has_errors, Block, BlockNestingMode, Diagnostic, DiagnosticSeverity, ProviderSchema, Schema,
};
use crate::types::{
    ImportedResource, PlanResult, ProviderMetadata, HANDSHAKE_PREFIX, PROTOCOL_VERSION,
};

/// Provider operations with JSON-valued payloads.
///
/// Errors returned from these methods are reported to the host as error
/// diagnostics; they never fail the RPC itself.
#[async_trait::async_trait]
pub trait ProviderService: Send + Sync + 'static {
    /// Provider config, resource and data source schemas.
    fn schema(&self) -> ProviderSchema;

    /// Type names offered by the provider, derived from the schema.
    fn metadata(&self) -> ProviderMetadata {
        let schema = self.schema();
        ProviderMetadata {
            resources: schema.resources.keys().cloned().collect(),
            data_sources: schema.data_sources.keys().cloned().collect(),
            capabilities: Default::default(),
        }
    }

    /// Check the provider configuration block without applying it.
    async fn validate_provider_config(
        &self,
        config: Value,
    ) -> Result<Vec<Diagnostic>, ProviderError> {
        let _ = config;
        Ok(vec![])
    }

    /// Apply the provider configuration.
    async fn configure(&self, config: Value) -> Result<Vec<Diagnostic>, ProviderError>;

    /// Release anything acquired by `configure`.
    async fn stop(&self) -> Result<(), ProviderError> {
        Ok(())
    }

    /// Check a resource configuration before planning.
    async fn validate_resource_config(
        &self,
        resource_type: &str,
        config: Value,
    ) -> Result<Vec<Diagnostic>, ProviderError> {
        let _ = (resource_type, config);
        Ok(vec![])
    }

    /// Upgrade state written by an older schema version. Every schema is at
    /// version 0, so state passes through unchanged by default.
    async fn upgrade_resource_state(
        &self,
        resource_type: &str,
        version: i64,
        state: Value,
    ) -> Result<Value, ProviderError> {
        let _ = (resource_type, version);
        Ok(state)
    }

    /// Plan the changes that move `prior_state` to `proposed_state`.
    async fn plan(
        &self,
        resource_type: &str,
        prior_state: Option<Value>,
        proposed_state: Value,
        config: Value,
    ) -> Result<PlanResult, ProviderError>;

    /// Create a resource and return its state.
    async fn create(&self, resource_type: &str, planned_state: Value)
        -> Result<Value, ProviderError>;

    /// Refresh a resource. `Value::Null` tells the host the resource is gone.
    async fn read(&self, resource_type: &str, current_state: Value) -> Result<Value, ProviderError>;

    /// Update a resource in place and return its new state.
    async fn update(
        &self,
        resource_type: &str,
        prior_state: Value,
        planned_state: Value,
    ) -> Result<Value, ProviderError>;

    /// Delete a resource.
    async fn delete(&self, resource_type: &str, current_state: Value) -> Result<(), ProviderError>;

    /// Build state for an existing remote object.
    async fn import_resource(
        &self,
        resource_type: &str,
        id: &str,
    ) -> Result<Vec<ImportedResource>, ProviderError> {
        let _ = id;
        Err(ProviderError::Unimplemented(format!(
            "import is not supported for {}",
            resource_type
        )))
    }

    /// Check a data source configuration.
    async fn validate_data_source_config(
        &self,
        data_source_type: &str,
        config: Value,
    ) -> Result<Vec<Diagnostic>, ProviderError> {
        let _ = (data_source_type, config);
        Ok(vec![])
    }

    /// Read a data source.
    async fn read_data_source(
        &self,
        data_source_type: &str,
        config: Value,
    ) -> Result<Value, ProviderError> {
        let _ = config;
        Err(ProviderError::UnknownResource(format!(
            "data source {}",
            data_source_type
        )))
    }
}

/// Decode a JSON payload. Empty bytes mean null.
fn decode_payload(field: &str, bytes: &[u8]) -> Result<Value, ProviderError> {
    if bytes.is_empty() {
        return Ok(Value::Null);
    }
    serde_json::from_slice(bytes)
        .map_err(|e| ProviderError::InvalidRequest(format!("{} is not valid JSON: {}", field, e)))
}

fn encode_payload(value: &Value) -> Vec<u8> {
    serde_json::to_vec(value).unwrap_or_default()
}

fn diagnostics_to_proto(diagnostics: Vec<Diagnostic>) -> Vec<proto::Diagnostic> {
    diagnostics
        .into_iter()
        .map(|d| proto::Diagnostic {
            severity: match d.severity {
                DiagnosticSeverity::Error => proto::diagnostic::Severity::Error as i32,
                DiagnosticSeverity::Warning => proto::diagnostic::Severity::Warning as i32,
            },
            summary: d.summary,
            detail: d.detail.unwrap_or_default(),
            attribute: d.attribute.unwrap_or_default(),
        })
        .collect()
}

fn error_to_diagnostics(err: ProviderError) -> Vec<proto::Diagnostic> {
    let detail = match &err {
        ProviderError::Api { status, .. } => format!("HTTP status {}", status),
        _ => String::new(),
    };
    vec![proto::Diagnostic {
        severity: proto::diagnostic::Severity::Error as i32,
        summary: err.to_string(),
        detail,
        attribute: String::new(),
    }]
}

fn schema_to_proto(schema: &Schema) -> proto::Schema {
    proto::Schema {
        version: schema.version as i64,
        block: Some(block_to_proto(&schema.block)),
    }
}

fn block_to_proto(block: &Block) -> proto::Block {
    proto::Block {
        attributes: block
            .attributes
            .iter()
            .map(|(name, attr)| proto::Attribute {
                name: name.clone(),
                r#type: serde_json::to_vec(&attr.attr_type).unwrap_or_default(),
                required: attr.flags.required,
                optional: attr.flags.optional,
                computed: attr.flags.computed,
                sensitive: attr.flags.sensitive,
                description: attr.description.clone().unwrap_or_default(),
                force_new: attr.force_new,
                default_value: attr.default.as_ref().map(encode_payload).unwrap_or_default(),
            })
            .collect(),
        block_types: block
            .blocks
            .iter()
            .map(|(name, nested)| proto::NestedBlock {
                type_name: name.clone(),
                block: Some(block_to_proto(&nested.block)),
                nesting_mode: match nested.nesting_mode {
                    BlockNestingMode::Single => proto::nested_block::NestingMode::Single as i32,
                    BlockNestingMode::List => proto::nested_block::NestingMode::List as i32,
                    BlockNestingMode::Set => proto::nested_block::NestingMode::Set as i32,
                    BlockNestingMode::Map => proto::nested_block::NestingMode::Map as i32,
                },
                min_items: nested.min_items as i32,
                max_items: nested.max_items as i32,
            })
            .collect(),
        description: block.description.clone().unwrap_or_default(),
    }
}

/// Adapts a [`ProviderService`] to the generated gRPC trait.
struct ProviderGrpcService<P: ProviderService> {
    provider: Arc<P>,
}

impl<P: ProviderService> ProviderGrpcService<P> {
    fn new(provider: Arc<P>) -> Self {
        Self { provider }
    }

    fn report(
        operation: &str,
        subject: &str,
        result: Result<Vec<Diagnostic>, ProviderError>,
    ) -> Vec<proto::Diagnostic> {
        match result {
            Ok(diagnostics) => {
                if has_errors(&diagnostics) {
                    warn!(
                        subject,
                        diagnostics = diagnostics.len(),
                        "{} completed with errors",
                        operation
                    );
                } else {
                    info!(subject, "{} completed", operation);
                }
                diagnostics_to_proto(diagnostics)
            },
            Err(e) => {
                error!(subject, error = %e, "{} failed", operation);
                error_to_diagnostics(e)
            },
        }
    }
}

#[tonic::async_trait]
impl<P: ProviderService> proto::provider_server::Provider for ProviderGrpcService<P> {
    #[instrument(skip(self, _request), name = "grpc.get_metadata")]
    async fn get_metadata(
        &self,
        _request: Request<proto::GetMetadataRequest>,
    ) -> Result<Response<proto::GetMetadataResponse>, Status> {
        let metadata = self.provider.metadata();
        debug!(
            resources = metadata.resources.len(),
            data_sources = metadata.data_sources.len(),
            "GetMetadata completed"
        );
        Ok(Response::new(proto::GetMetadataResponse {
            server_capabilities: Some(proto::ServerCapabilities {
                plan_destroy: metadata.capabilities.plan_destroy,
            }),
            resources: metadata.resources,
            data_sources: metadata.data_sources,
            diagnostics: vec![],
        }))
    }

    #[instrument(skip(self, _request), name = "grpc.get_schema")]
    async fn get_schema(
        &self,
        _request: Request<proto::GetSchemaRequest>,
    ) -> Result<Response<proto::GetSchemaResponse>, Status> {
        let schema = self.provider.schema();
        debug!(
            resources = schema.resources.len(),
            data_sources = schema.data_sources.len(),
            "GetSchema completed"
        );
        Ok(Response::new(proto::GetSchemaResponse {
            provider: Some(schema_to_proto(&schema.provider)),
            resources: schema
                .resources
                .iter()
                .map(|(k, v)| (k.clone(), schema_to_proto(v)))
                .collect(),
            data_sources: schema
                .data_sources
                .iter()
                .map(|(k, v)| (k.clone(), schema_to_proto(v)))
                .collect(),
            diagnostics: vec![],
        }))
    }

    #[instrument(skip(self, request), name = "grpc.validate_provider_config")]
    async fn validate_provider_config(
        &self,
        request: Request<proto::ValidateProviderConfigRequest>,
    ) -> Result<Response<proto::ValidateProviderConfigResponse>, Status> {
        let req = request.into_inner();
        let result = match decode_payload("config", &req.config) {
            Ok(config) => self.provider.validate_provider_config(config).await,
            Err(e) => Err(e),
        };
        Ok(Response::new(proto::ValidateProviderConfigResponse {
            diagnostics: Self::report("ValidateProviderConfig", "provider", result),
        }))
    }

    #[instrument(skip(self, request), name = "grpc.configure")]
    async fn configure(
        &self,
        request: Request<proto::ConfigureRequest>,
    ) -> Result<Response<proto::ConfigureResponse>, Status> {
        let req = request.into_inner();
        let result = match decode_payload("config", &req.config) {
            Ok(config) => self.provider.configure(config).await,
            Err(e) => Err(e),
        };
        Ok(Response::new(proto::ConfigureResponse {
            diagnostics: Self::report("Configure", "provider", result),
        }))
    }

    #[instrument(skip(self, _request), name = "grpc.stop")]
    async fn stop(
        &self,
        _request: Request<proto::StopRequest>,
    ) -> Result<Response<proto::StopResponse>, Status> {
        info!("Stop called");
        let error = match self.provider.stop().await {
            Ok(()) => String::new(),
            Err(e) => {
                error!(error = %e, "Stop failed");
                e.to_string()
            },
        };
        Ok(Response::new(proto::StopResponse { error }))
    }

    #[instrument(skip(self, request), name = "grpc.validate_resource_config")]
    async fn validate_resource_config(
        &self,
        request: Request<proto::ValidateResourceConfigRequest>,
    ) -> Result<Response<proto::ValidateResourceConfigResponse>, Status> {
        let req = request.into_inner();
        debug!(resource_type = %req.resource_type, "ValidateResourceConfig called");
        let result = match decode_payload("config", &req.config) {
            Ok(config) => {
                self.provider
                    .validate_resource_config(&req.resource_type, config)
                    .await
            },
            Err(e) => Err(e),
        };
        Ok(Response::new(proto::ValidateResourceConfigResponse {
            diagnostics: Self::report("ValidateResourceConfig", &req.resource_type, result),
        }))
    }

    #[instrument(skip(self, request), name = "grpc.upgrade_resource_state")]
    async fn upgrade_resource_state(
        &self,
        request: Request<proto::UpgradeResourceStateRequest>,
    ) -> Result<Response<proto::UpgradeResourceStateResponse>, Status> {
        let req = request.into_inner();
        debug!(
            resource_type = %req.resource_type,
            version = req.version,
            "UpgradeResourceState called"
        );
        let result = match decode_payload("raw_state", &req.raw_state) {
            Ok(state) => {
                self.provider
                    .upgrade_resource_state(&req.resource_type, req.version, state)
                    .await
            },
            Err(e) => Err(e),
        };

        let response = match result {
            Ok(upgraded) => proto::UpgradeResourceStateResponse {
                upgraded_state: encode_payload(&upgraded),
                diagnostics: vec![],
            },
            Err(e) => {
                error!(
                    resource_type = %req.resource_type,
                    error = %e,
                    "UpgradeResourceState failed"
                );
                proto::UpgradeResourceStateResponse {
                    upgraded_state: vec![],
                    diagnostics: error_to_diagnostics(e),
                }
            },
        };
        Ok(Response::new(response))
    }

    #[instrument(skip(self, request), name = "grpc.plan")]
    async fn plan(
        &self,
        request: Request<proto::PlanRequest>,
    ) -> Result<Response<proto::PlanResponse>, Status> {
        let req = request.into_inner();
        let is_create = req.prior_state.is_empty();
        debug!(resource_type = %req.resource_type, is_create, "Plan called");

        let decoded = decode_payload("prior_state", &req.prior_state).and_then(|prior| {
            let proposed = decode_payload("proposed_state", &req.proposed_state)?;
            let config = decode_payload("config", &req.config)?;
            Ok((prior, proposed, config))
        });
        let result = match decoded {
            Ok((prior, proposed, config)) => {
                let prior = Some(prior).filter(|p| !p.is_null());
                self.provider
                    .plan(&req.resource_type, prior, proposed, config)
                    .await
            },
            Err(e) => Err(e),
        };

        let response = match result {
            Ok(result) => {
                info!(
                    resource_type = %req.resource_type,
                    changes = result.changes.len(),
                    requires_replace = result.requires_replace,
                    "Plan completed"
                );
                proto::PlanResponse {
                    planned_state: encode_payload(&result.planned_state),
                    changes: result.changes.into_iter().map(Into::into).collect(),
                    requires_replace: result.requires_replace,
                    diagnostics: vec![],
                }
            },
            Err(e) => {
                error!(resource_type = %req.resource_type, error = %e, "Plan failed");
                proto::PlanResponse {
                    planned_state: vec![],
                    changes: vec![],
                    requires_replace: false,
                    diagnostics: error_to_diagnostics(e),
                }
            },
        };
        Ok(Response::new(response))
    }

    #[instrument(skip(self, request), name = "grpc.create")]
    async fn create(
        &self,
        request: Request<proto::CreateRequest>,
    ) -> Result<Response<proto::CreateResponse>, Status> {
        let req = request.into_inner();
        info!(resource_type = %req.resource_type, "Create called");
        let result = match decode_payload("planned_state", &req.planned_state) {
            Ok(planned) => self.provider.create(&req.resource_type, planned).await,
            Err(e) => Err(e),
        };

        let response = match result {
            Ok(state) => {
                info!(resource_type = %req.resource_type, "Create completed");
                proto::CreateResponse {
                    state: encode_payload(&state),
                    diagnostics: vec![],
                }
            },
            Err(e) => {
                error!(resource_type = %req.resource_type, error = %e, "Create failed");
                proto::CreateResponse {
                    state: vec![],
                    diagnostics: error_to_diagnostics(e),
                }
            },
        };
        Ok(Response::new(response))
    }

    #[instrument(skip(self, request), name = "grpc.read")]
    async fn read(
        &self,
        request: Request<proto::ReadRequest>,
    ) -> Result<Response<proto::ReadResponse>, Status> {
        let req = request.into_inner();
        debug!(resource_type = %req.resource_type, "Read called");
        let result = match decode_payload("current_state", &req.current_state) {
            Ok(current) => self.provider.read(&req.resource_type, current).await,
            Err(e) => Err(e),
        };

        let response = match result {
            Ok(state) => {
                debug!(
                    resource_type = %req.resource_type,
                    gone = state.is_null(),
                    "Read completed"
                );
                proto::ReadResponse {
                    state: encode_payload(&state),
                    diagnostics: vec![],
                }
            },
            Err(e) => {
                error!(resource_type = %req.resource_type, error = %e, "Read failed");
                proto::ReadResponse {
                    state: vec![],
                    diagnostics: error_to_diagnostics(e),
                }
            },
        };
        Ok(Response::new(response))
    }

    #[instrument(skip(self, request), name = "grpc.update")]
    async fn update(
        &self,
        request: Request<proto::UpdateRequest>,
    ) -> Result<Response<proto::UpdateResponse>, Status> {
        let req = request.into_inner();
        info!(resource_type = %req.resource_type, "Update called");
        let decoded = decode_payload("prior_state", &req.prior_state).and_then(|prior| {
            Ok((prior, decode_payload("planned_state", &req.planned_state)?))
        });
        let result = match decoded {
            Ok((prior, planned)) => self.provider.update(&req.resource_type, prior, planned).await,
            Err(e) => Err(e),
        };

        let response = match result {
            Ok(state) => {
                info!(resource_type = %req.resource_type, "Update completed");
                proto::UpdateResponse {
                    state: encode_payload(&state),
                    diagnostics: vec![],
                }
            },
            Err(e) => {
                error!(resource_type = %req.resource_type, error = %e, "Update failed");
                proto::UpdateResponse {
                    state: vec![],
                    diagnostics: error_to_diagnostics(e),
                }
            },
        };
        Ok(Response::new(response))
    }

    #[instrument(skip(self, request), name = "grpc.delete")]
    async fn delete(
        &self,
        request: Request<proto::DeleteRequest>,
    ) -> Result<Response<proto::DeleteResponse>, Status> {
        let req = request.into_inner();
        info!(resource_type = %req.resource_type, "Delete called");
        let result = match decode_payload("current_state", &req.current_state) {
            Ok(current) => self.provider.delete(&req.resource_type, current).await,
            Err(e) => Err(e),
        };

        let diagnostics = match result {
            Ok(()) => {
                info!(resource_type = %req.resource_type, "Delete completed");
                vec![]
            },
            Err(e) => {
                error!(resource_type = %req.resource_type, error = %e, "Delete failed");
                error_to_diagnostics(e)
            },
        };
        Ok(Response::new(proto::DeleteResponse { diagnostics }))
    }

    #[instrument(skip(self, request), name = "grpc.import_resource_state")]
    async fn import_resource_state(
        &self,
        request: Request<proto::ImportResourceStateRequest>,
    ) -> Result<Response<proto::ImportResourceStateResponse>, Status> {
        let req = request.into_inner();
        info!(resource_type = %req.resource_type, id = %req.id, "ImportResourceState called");

        let response = match self.provider.import_resource(&req.resource_type, &req.id).await {
            Ok(imported) => {
                info!(
                    resource_type = %req.resource_type,
                    id = %req.id,
                    imported = imported.len(),
                    "ImportResourceState completed"
                );
                proto::ImportResourceStateResponse {
                    imported: imported
                        .into_iter()
                        .map(|r| proto::ImportedResource {
                            resource_type: r.resource_type,
                            state: encode_payload(&r.state),
                        })
                        .collect(),
                    diagnostics: vec![],
                }
            },
            Err(e) => {
                error!(
                    resource_type = %req.resource_type,
                    id = %req.id,
                    error = %e,
                    "ImportResourceState failed"
                );
                proto::ImportResourceStateResponse {
                    imported: vec![],
                    diagnostics: error_to_diagnostics(e),
                }
            },
        };
        Ok(Response::new(response))
    }

    #[instrument(skip(self, request), name = "grpc.validate_data_source_config")]
    async fn validate_data_source_config(
        &self,
        request: Request<proto::ValidateDataSourceConfigRequest>,
    ) -> Result<Response<proto::ValidateDataSourceConfigResponse>, Status> {
        let req = request.into_inner();
        debug!(data_source_type = %req.data_source_type, "ValidateDataSourceConfig called");
        let result = match decode_payload("config", &req.config) {
            Ok(config) => {
                self.provider
                    .validate_data_source_config(&req.data_source_type, config)
                    .await
            },
            Err(e) => Err(e),
        };
        Ok(Response::new(proto::ValidateDataSourceConfigResponse {
            diagnostics: Self::report("ValidateDataSourceConfig", &req.data_source_type, result),
        }))
    }

    #[instrument(skip(self, request), name = "grpc.read_data_source")]
    async fn read_data_source(
        &self,
        request: Request<proto::ReadDataSourceRequest>,
    ) -> Result<Response<proto::ReadDataSourceResponse>, Status> {
        let req = request.into_inner();
        debug!(data_source_type = %req.data_source_type, "ReadDataSource called");
        let result = match decode_payload("config", &req.config) {
            Ok(config) => {
                self.provider
                    .read_data_source(&req.data_source_type, config)
                    .await
            },
            Err(e) => Err(e),
        };

        let response = match result {
            Ok(state) => {
                info!(data_source_type = %req.data_source_type, "ReadDataSource completed");
                proto::ReadDataSourceResponse {
                    state: encode_payload(&state),
                    diagnostics: vec![],
                }
            },
            Err(e) => {
                error!(
                    data_source_type = %req.data_source_type,
                    error = %e,
                    "ReadDataSource failed"
                );
                proto::ReadDataSourceResponse {
                    state: vec![],
                    diagnostics: error_to_diagnostics(e),
                }
            },
        };
        Ok(Response::new(response))
    }
}

/// Options for [`serve_with_options`].
#[derive(Debug, Clone)]
pub struct ServeOptions {
    /// How long in-flight requests may run after a shutdown signal.
    /// Default: 30 seconds.
    pub shutdown_timeout: Duration,
}

impl Default for ServeOptions {
    fn default() -> Self {
        Self {
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}

impl ServeOptions {
    /// Default options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the shutdown timeout.
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }
}

/// Resolve on SIGTERM or SIGINT (CTRL+C elsewhere).
///
/// Never resolves when the handlers cannot be installed.
async fn wait_for_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
            (Ok(mut sigterm), Ok(mut sigint)) => {
                tokio::select! {
                    _ = sigterm.recv() => info!("Received SIGTERM, shutting down"),
                    _ = sigint.recv() => info!("Received SIGINT, shutting down"),
                }
            },
            (Err(e), _) | (_, Err(e)) => {
                warn!(error = %e, "Cannot install signal handlers");
                std::future::pending::<()>().await;
            },
        }
    }

    #[cfg(not(unix))]
    {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Received CTRL+C, shutting down"),
            Err(e) => {
                warn!(error = %e, "Cannot install CTRL+C handler");
                std::future::pending::<()>().await;
            },
        }
    }
}

/// Serve `provider` on a free local port.
///
/// Prints `HEMMER_PROVIDER|<version>|<address>` to stdout once listening and
/// returns after a shutdown signal.
pub async fn serve<P: ProviderService>(provider: P) -> Result<(), Box<dyn std::error::Error>> {
    serve_with_options(provider, ServeOptions::default()).await
}

/// [`serve`] with custom options.
pub async fn serve_with_options<P: ProviderService>(
    provider: P,
    options: ServeOptions,
) -> Result<(), Box<dyn std::error::Error>> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    serve_on_listener(provider, listener, options).await
}

/// Serve `provider` on a fixed address.
pub async fn serve_on<P: ProviderService>(
    provider: P,
    addr: SocketAddr,
) -> Result<(), Box<dyn std::error::Error>> {
    serve_on_with_options(provider, addr, ServeOptions::default()).await
}

/// [`serve_on`] with custom options.
pub async fn serve_on_with_options<P: ProviderService>(
    provider: P,
    addr: SocketAddr,
    options: ServeOptions,
) -> Result<(), Box<dyn std::error::Error>> {
    let listener = TcpListener::bind(addr).await?;
    serve_on_listener(provider, listener, options).await
}

async fn serve_on_listener<P: ProviderService>(
    provider: P,
    listener: TcpListener,
    options: ServeOptions,
) -> Result<(), Box<dyn std::error::Error>> {
    let addr = listener.local_addr()?;
    println!("{}|{}|{}", HANDSHAKE_PREFIX, PROTOCOL_VERSION, addr);
    info!(address = %addr, "Provider server starting");

    let provider = Arc::new(provider);
    let service = proto::provider_server::ProviderServer::new(ProviderGrpcService::new(
        Arc::clone(&provider),
    ));

    let (signalled_tx, signalled_rx) = oneshot::channel::<()>();
    let server = Server::builder()
        .add_service(service)
        .serve_with_incoming_shutdown(TcpListenerStream::new(listener), async move {
            wait_for_shutdown_signal().await;
            let _ = signalled_tx.send(());
        });
    tokio::pin!(server);

    // The timeout only starts once the signal arrives.
    let finished = tokio::select! {
        biased;
        result = &mut server => Some(result),
        _ = signalled_rx => None,
    };
    let outcome = match finished {
        Some(result) => Some(result),
        None => tokio::time::timeout(options.shutdown_timeout, &mut server)
            .await
            .ok(),
    };

    finish_shutdown(provider.as_ref(), outcome, options.shutdown_timeout).await
}

/// Log how serving ended, then stop the provider. A server error is returned
/// only after `stop()` has run.
async fn finish_shutdown<P, E>(
    provider: &P,
    outcome: Option<Result<(), E>>,
    shutdown_timeout: Duration,
) -> Result<(), Box<dyn std::error::Error>>
where
    P: ProviderService,
    E: std::error::Error + 'static,
{
    let served = match outcome {
        Some(Ok(())) => {
            info!("Server shutdown complete");
            Ok(())
        },
        Some(Err(e)) => {
            error!(error = %e, "Server error");
            Err(e)
        },
        None => {
            warn!(
                timeout = ?shutdown_timeout,
                "Shutdown timeout exceeded, abandoning in-flight requests"
            );
            Ok(())
        },
    };

    debug!("Calling provider stop()");
    if let Err(e) = provider.stop().await {
        warn!(error = %e, "Provider stop() returned error");
    }
    info!("Provider shutdown complete");
    served.map_err(|e| Box::new(e) as Box<dyn std::error::Error>)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generated::provider_server::Provider;
    use crate::SquadcastProvider;
    use serde_json::json;

    fn grpc() -> ProviderGrpcService<SquadcastProvider> {
        ProviderGrpcService::new(Arc::new(SquadcastProvider::new()))
    }

    #[test]
    fn test_decode_payload() {
        assert_eq!(decode_payload("config", b"").unwrap(), Value::Null);
        assert_eq!(decode_payload("config", br#"{"a":1}"#).unwrap(), json!({"a": 1}));

        let err = decode_payload("planned_state", b"{not json").unwrap_err();
        assert!(err.to_string().contains("planned_state"));
    }

    #[test]
    fn test_block_to_proto() {
        let schema = SquadcastProvider::new().schema();
        let webform = schema_to_proto(&schema.resources["squadcast_webform"]);
        let block = webform.block.unwrap();

        let team = block.attributes.iter().find(|a| a.name == "team_id").unwrap();
        assert!(team.required);
        assert!(team.force_new);

        let is_cname = block.attributes.iter().find(|a| a.name == "is_cname").unwrap();
        assert_eq!(is_cname.default_value, b"false".to_vec());

        let services = block.block_types.iter().find(|b| b.type_name == "services").unwrap();
        assert_eq!(services.min_items, 1);
        assert_eq!(services.nesting_mode, proto::nested_block::NestingMode::List as i32);
    }

    #[tokio::test]
    async fn test_get_metadata_lists_types() {
        let response = grpc()
            .get_metadata(Request::new(proto::GetMetadataRequest {}))
            .await
            .unwrap()
            .into_inner();
        assert_eq!(response.resources.len(), 4);
        assert_eq!(response.data_sources, vec!["squadcast_schedule".to_string()]);
    }

    #[tokio::test]
    async fn test_invalid_payload_becomes_diagnostic() {
        let response = grpc()
            .create(Request::new(proto::CreateRequest {
                resource_type: "squadcast_webform".to_string(),
                planned_state: b"{oops".to_vec(),
            }))
            .await
            .unwrap()
            .into_inner();

        assert!(response.state.is_empty());
        assert_eq!(response.diagnostics.len(), 1);
        assert!(response.diagnostics[0].summary.contains("planned_state"));
    }

    #[tokio::test]
    async fn test_validate_resource_config_over_grpc() {
        let config = json!({"name": "Primary", "timezone": "UTC", "team_id": "bad"});
        let response = grpc()
            .validate_resource_config(Request::new(proto::ValidateResourceConfigRequest {
                resource_type: "squadcast_schedule_v2".to_string(),
                config: serde_json::to_vec(&config).unwrap(),
            }))
            .await
            .unwrap()
            .into_inner();

        assert_eq!(response.diagnostics.len(), 1);
        assert_eq!(response.diagnostics[0].attribute, "team_id");
        assert_eq!(
            response.diagnostics[0].severity,
            proto::diagnostic::Severity::Error as i32
        );
    }

    #[tokio::test]
    async fn test_upgrade_passes_state_through() {
        let state = json!({"id": "7", "name": "Primary"});
        let response = grpc()
            .upgrade_resource_state(Request::new(proto::UpgradeResourceStateRequest {
                resource_type: "squadcast_schedule_v2".to_string(),
                version: 0,
                raw_state: serde_json::to_vec(&state).unwrap(),
            }))
            .await
            .unwrap()
            .into_inner();

        assert!(response.diagnostics.is_empty());
        let upgraded: Value = serde_json::from_slice(&response.upgraded_state).unwrap();
        assert_eq!(upgraded, state);
    }

    #[tokio::test]
    async fn test_plan_over_grpc() {
        let proposed = json!({
            "name": "Primary",
            "timezone": "UTC",
            "team_id": "611262fcd5b4ea846b534a8a"
        });
        let response = grpc()
            .plan(Request::new(proto::PlanRequest {
                resource_type: "squadcast_schedule_v2".to_string(),
                prior_state: vec![],
                proposed_state: serde_json::to_vec(&proposed).unwrap(),
                config: vec![],
            }))
            .await
            .unwrap()
            .into_inner();

        assert!(response.diagnostics.is_empty());
        assert!(!response.requires_replace);
        let planned: Value = serde_json::from_slice(&response.planned_state).unwrap();
        assert_eq!(planned["id"], Value::Null);
        assert!(response.changes.iter().any(|c| c.path == "name"));
    }

    #[tokio::test]
    async fn test_server_error_still_stops_provider() {
        let server = wiremock::MockServer::start().await;
        wiremock::Mock::given(wiremock::matchers::path("/oauth/access-token"))
            .respond_with(wiremock::ResponseTemplate::new(200).set_body_json(json!({
                "data": {"access_token": "access", "token_type": "Bearer"}
            })))
            .mount(&server)
            .await;
        let provider = SquadcastProvider::new();
        provider
            .configure(json!({"refresh_token": "refresh", "endpoint": server.uri()}))
            .await
            .unwrap();
        assert!(provider.is_configured().await);

        let failed = std::io::Error::new(std::io::ErrorKind::AddrInUse, "accept failed");
        let result = finish_shutdown(&provider, Some(Err(failed)), Duration::from_secs(1)).await;
        assert!(result.unwrap_err().to_string().contains("accept failed"));
        assert!(!provider.is_configured().await);

        let timed_out: Option<Result<(), std::io::Error>> = None;
        assert!(finish_shutdown(&provider, timed_out, Duration::from_secs(1)).await.is_ok());
    }
}
