use reqwest::Client;

use ingest_config::{ApiEndpoints, EngineConfig};
use ingest_models::{Connector as ConnectorModel, SourceType};

use super::error::ConnectorError;
use super::file::FileConnector;
use super::google_drive::GoogleDriveConnector;
use super::nop::NopConnector;
use super::onedrive::OneDriveConnector;
use super::teams::TeamsConnector;
use super::traits::Connector;
use super::web::WebConnector;
use super::youtube::YoutubeConnector;

/// Process-wide dependencies handed to every connector
#[derive(Clone)]
pub struct ConnectorContext {
    pub http: Client,
    pub endpoints: ApiEndpoints,
    /// Per-file size limit in bytes when the trigger carries none
    pub default_file_limit: u64,
}

impl ConnectorContext {
    pub fn new(http: Client, endpoints: ApiEndpoints, default_file_limit: u64) -> Self {
        Self {
            http,
            endpoints,
            default_file_limit,
        }
    }

    pub fn from_config(config: &EngineConfig) -> Result<Self, ConnectorError> {
        let http = Client::builder()
            .timeout(config.http_timeout())
            .user_agent(format!("{}/{}", config.service_name, env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self::new(http, config.endpoints.clone(), config.file_size_limit_bytes()))
    }
}

/// Builds and validates the connector for a stored record
pub fn build(model: &ConnectorModel, context: &ConnectorContext) -> Result<Box<dyn Connector>, ConnectorError> {
    let connector: Box<dyn Connector> = match &model.source {
        SourceType::Web => Box::new(WebConnector::new(model, context)?),
        SourceType::File => Box::new(FileConnector::new(model)?),
        SourceType::OneDrive => Box::new(OneDriveConnector::new(model, context)?),
        SourceType::GoogleDrive => Box::new(GoogleDriveConnector::new(model, context)?),
        SourceType::MsTeams => Box::new(TeamsConnector::new(model, context)?),
        SourceType::Youtube => Box::new(YoutubeConnector::new(model)?),
        SourceType::Other(_) => Box::new(NopConnector::new(model)),
    };
    connector.validate()?;
    Ok(connector)
}
