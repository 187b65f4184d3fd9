//! Configuração do caseflow carregada a partir de `caseflow.toml`.
//!
//! A struct [`CaseflowConfig`] contém os endpoints remotos, as credenciais e
//! os parâmetros de lock, polling e sessão, e monta os componentes a partir
//! deles. Valores ausentes no arquivo usam defaults. As variáveis
//! `CASEFLOW_API_KEY`, `CASEFLOW_STORAGE_ENDPOINT` e
//! `CASEFLOW_ENGINE_ENDPOINT` têm precedência sobre o arquivo.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use tracing::debug;

use crate::command::builtin::CommandDependencies;
use crate::engine::{PollSettings, ProcessEngine};
use crate::error::{EngineError, Result};
use crate::lock::{InstanceLockClient, LockClient, ProcessLockClient};
use crate::remote::HttpProcessEngineClient;
use crate::session::InMemorySessionCache;

/// Nome do arquivo procurado no diretório atual.
pub const CONFIG_FILE: &str = "caseflow.toml";

/// Qual API de lock do storage usar.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LockApi {
    /// Lock sobre a instância (`/lock`, token de lock).
    #[default]
    Instance,
    /// Lock sobre o processo da instância (`/process/lock`, lock id).
    Process,
}

/// Configuração de nível superior carregada de `caseflow.toml`.
#[derive(Debug, Clone, Deserialize)]
pub struct CaseflowConfig {
    /// URL base da API de storage (locks de instância).
    #[serde(default = "default_storage_endpoint")]
    pub storage_endpoint: String,

    /// URL base do motor de processo remoto.
    #[serde(default = "default_engine_endpoint")]
    pub engine_endpoint: String,

    /// Chave enviada em `X-Api-Key` ao motor remoto.
    #[serde(default)]
    pub api_key: String,

    /// Chave de assinatura do gateway, quando houver.
    #[serde(default)]
    pub subscription_key: Option<String>,

    /// API de lock usada pelo motor.
    #[serde(default)]
    pub lock_api: LockApi,

    /// Tempo de vida do lock de instância, em segundos.
    #[serde(default = "default_lock_ttl_secs")]
    pub lock_ttl_secs: u64,

    /// Como o status de jobs remotos é consultado.
    #[serde(default)]
    pub poll: PollSettings,

    /// Expiração deslizante do cache de sessão, em segundos.
    #[serde(default = "default_session_expiry_secs")]
    pub session_expiry_secs: u64,

    /// Apaga a instância quando o processo termina.
    #[serde(default)]
    pub auto_delete_on_process_end: bool,
}

// Valor padrão para o storage: instância local.
fn default_storage_endpoint() -> String {
    "http://localhost:5101/storage/api/v1".to_string()
}

fn default_engine_endpoint() -> String {
    "http://localhost:5005".to_string()
}

// Valor padrão do TTL de lock: 300s.
fn default_lock_ttl_secs() -> u64 {
    300
}

// Valor padrão da expiração de sessão: 10 minutos.
fn default_session_expiry_secs() -> u64 {
    600
}

impl Default for CaseflowConfig {
    fn default() -> Self {
        Self {
            storage_endpoint: default_storage_endpoint(),
            engine_endpoint: default_engine_endpoint(),
            api_key: String::new(),
            subscription_key: None,
            lock_api: LockApi::default(),
            lock_ttl_secs: default_lock_ttl_secs(),
            poll: PollSettings::default(),
            session_expiry_secs: default_session_expiry_secs(),
            auto_delete_on_process_end: false,
        }
    }
}

impl CaseflowConfig {
    /// Carrega `caseflow.toml` do diretório atual.
    /// Usa valores padrão se o arquivo não existir.
    pub fn load() -> Result<Self> {
        Self::load_from(Path::new(CONFIG_FILE))
    }

    /// Carrega a configuração de `path`, aplicando as variáveis de ambiente.
    pub fn load_from(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let contents = std::fs::read_to_string(path)?;
            toml::from_str::<CaseflowConfig>(&contents)?
        } else {
            debug!(path = %path.display(), "No config file, using defaults");
            Self::default()
        };

        config.apply_env(|name| std::env::var(name).ok());
        config.validate()?;
        Ok(config)
    }

    /// Variáveis de ambiente têm precedência sobre o arquivo. Valores vazios são ignorados.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let read = |name: &str| lookup(name).filter(|v| !v.is_empty());

        if let Some(key) = read("CASEFLOW_API_KEY") {
            self.api_key = key;
        }
        if let Some(endpoint) = read("CASEFLOW_STORAGE_ENDPOINT") {
            self.storage_endpoint = endpoint;
        }
        if let Some(endpoint) = read("CASEFLOW_ENGINE_ENDPOINT") {
            self.engine_endpoint = endpoint;
        }
    }

    fn validate(&self) -> Result<()> {
        if self.lock_ttl_secs == 0 {
            return Err(EngineError::Config("lock_ttl_secs must be positive".into()));
        }
        if self.poll.timeout.is_zero() {
            return Err(EngineError::Config("poll.timeout must be positive".into()));
        }
        Ok(())
    }

    pub fn lock_ttl(&self) -> Duration {
        Duration::from_secs(self.lock_ttl_secs)
    }

    pub fn session_expiry(&self) -> Duration {
        Duration::from_secs(self.session_expiry_secs)
    }

    /// Chave da API, ou `None` quando não configurada.
    pub fn api_key(&self) -> Option<String> {
        (!self.api_key.is_empty()).then(|| self.api_key.clone())
    }

    /// Cliente de lock do storage configurado.
    pub fn lock_client(&self) -> Result<Arc<dyn LockClient>> {
        let endpoint = self.storage_endpoint.clone();
        let key = self.subscription_key.clone();
        let client: Arc<dyn LockClient> = match self.lock_api {
            LockApi::Instance => Arc::new(InstanceLockClient::new(endpoint, key)?),
            LockApi::Process => Arc::new(ProcessLockClient::new(endpoint, key)?),
        };
        Ok(client)
    }

    /// Cliente HTTP do motor remoto.
    pub fn engine_client(&self) -> Result<HttpProcessEngineClient> {
        Ok(HttpProcessEngineClient::new(self.engine_endpoint.clone(), self.api_key())?)
    }

    /// Motor de transições com lock, TTL e polling desta configuração.
    /// `auto_delete_on_process_end` da configuração substitui o de `deps`.
    pub fn process_engine(&self, deps: CommandDependencies) -> Result<ProcessEngine> {
        let deps = CommandDependencies {
            auto_delete_on_process_end: self.auto_delete_on_process_end,
            ..deps
        };
        Ok(ProcessEngine::new(deps, self.lock_client()?)?
            .with_lock_ttl(self.lock_ttl())
            .with_poll_settings(self.poll))
    }

    /// Cache de sessão em memória com a expiração configurada.
    pub fn session_cache(&self) -> InMemorySessionCache {
        InMemorySessionCache::default().with_sliding_expiry(self.session_expiry())
    }
}
