//! Interface de linha de comando do caseflow baseada em clap.
//!
//! Define a struct [`Cli`] com subcomandos [`Command`] (plan, validate,
//! backoff, status) e flags globais (--config, --verbose).

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use uuid::Uuid;

use crate::command::TransitionKind;
use crate::retry::BackoffKind;

/// caseflow: motor de transições para instâncias de processo de longa duração.
#[derive(Debug, Parser)]
#[command(name = "caseflow", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Caminho do arquivo de configuração (padrão: ./caseflow.toml).
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Habilita saída detalhada (verbose).
    #[arg(long, short, global = true, default_value_t = false)]
    pub verbose: bool,
}

/// Estratégia de backoff aceita pela CLI, mapeada para [`BackoffKind`].
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum BackoffArg {
    /// Sem espera entre tentativas.
    None,
    /// Espera constante.
    Constant,
    /// Espera cresce linearmente.
    Linear,
    /// Espera dobra a cada tentativa.
    Exponential,
}

impl From<BackoffArg> for BackoffKind {
    fn from(arg: BackoffArg) -> Self {
        match arg {
            BackoffArg::None => BackoffKind::None,
            BackoffArg::Constant => BackoffKind::Constant,
            BackoffArg::Linear => BackoffKind::Linear,
            BackoffArg::Exponential => BackoffKind::Exponential,
        }
    }
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Mostra o conjunto de comandos de uma transição.
    Plan {
        /// Tipo de transição (task-start, task-end, task-abandon, process-end).
        kind: TransitionKind,

        /// Tipo de service task executado após o commit de um início de tarefa.
        #[arg(long)]
        service_task_type: Option<String>,

        /// Marca o início da primeira tarefa de um processo novo.
        #[arg(long, default_value_t = false)]
        initial: bool,
    },

    /// Verifica se os comandos embutidos cobrem todas as transições.
    Validate,

    /// Mostra os atrasos de uma estratégia de retentativa.
    Backoff {
        /// Tipo de backoff.
        #[arg(long, value_enum)]
        kind: BackoffArg,

        /// Atraso base em milissegundos.
        #[arg(long)]
        delay_ms: u64,

        /// Máximo de retentativas.
        #[arg(long)]
        max_retries: Option<u32>,

        /// Limite superior do atraso em milissegundos.
        #[arg(long)]
        max_delay_ms: Option<u64>,

        /// Quantas iterações mostrar.
        #[arg(long, default_value_t = 5)]
        iterations: u32,
    },

    /// Consulta o job ativo de uma instância no motor remoto.
    Status {
        /// Party id do dono da instância.
        #[arg(long)]
        party: i64,

        /// GUID da instância.
        #[arg(long)]
        instance: Uuid,

        /// Espera o job terminar, consultando conforme `[poll]` da configuração.
        #[arg(long, default_value_t = false)]
        wait: bool,
    },
}
