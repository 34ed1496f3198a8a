//! Command line definitions

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use quality_loop_client::ArtifactType;

/// Score a document and iterate on it until it meets a quality threshold
#[derive(Debug, Parser)]
#[command(name = "quality-loop", version, about)]
pub struct Cli {
    /// Analysis service base URL (overrides QUALITY_LOOP_BASE_URL)
    #[arg(long, global = true, value_name = "URL")]
    pub base_url: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run a single analysis and print the result
    Analyse {
        /// File holding the artifact text
        file: PathBuf,

        /// Skip type detection and analyse as this type
        #[arg(short = 't', long, value_enum)]
        artifact_type: Option<ArtifactKind>,

        /// Readiness threshold (0-100)
        #[arg(long)]
        threshold: Option<f64>,
    },

    /// Analyse, accept all suggestions and re-analyse until ready
    Iterate {
        /// File holding the artifact text
        file: PathBuf,

        /// Readiness threshold (0-100)
        #[arg(long)]
        threshold: Option<f64>,

        /// Stop after this many rounds
        #[arg(short, long, default_value_t = 5, value_parser = clap::value_parser!(u32).range(1..))]
        max_rounds: u32,

        /// Delete the server-side session when done
        #[arg(long)]
        cleanup: bool,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum ArtifactKind {
    RequirementsDocument,
    BusinessProcess,
    UserStory,
    UseCase,
}

impl From<ArtifactKind> for ArtifactType {
    fn from(kind: ArtifactKind) -> Self {
        match kind {
            ArtifactKind::RequirementsDocument => ArtifactType::RequirementsDocument,
            ArtifactKind::BusinessProcess => ArtifactType::BusinessProcess,
            ArtifactKind::UserStory => ArtifactType::UserStory,
            ArtifactKind::UseCase => ArtifactType::UseCase,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_analyse_with_type_and_threshold() {
        let cli = Cli::try_parse_from([
            "quality-loop",
            "analyse",
            "story.md",
            "--artifact-type",
            "user-story",
            "--threshold",
            "75",
        ])
        .expect("parse");
        match cli.command {
            Command::Analyse {
                file,
                artifact_type,
                threshold,
            } => {
                assert_eq!(file, PathBuf::from("story.md"));
                assert_eq!(artifact_type, Some(ArtifactKind::UserStory));
                assert_eq!(threshold, Some(75.0));
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn iterate_defaults_and_global_base_url() {
        let cli = Cli::try_parse_from([
            "quality-loop",
            "iterate",
            "reqs.md",
            "--base-url",
            "http://localhost:9000",
        ])
        .expect("parse");
        assert_eq!(cli.base_url.as_deref(), Some("http://localhost:9000"));
        match cli.command {
            Command::Iterate {
                max_rounds,
                cleanup,
                threshold,
                ..
            } => {
                assert_eq!(max_rounds, 5);
                assert!(!cleanup);
                assert!(threshold.is_none());
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn rejects_zero_max_rounds() {
        let err = Cli::try_parse_from(["quality-loop", "iterate", "reqs.md", "--max-rounds", "0"])
            .expect_err("zero rounds");
        assert_eq!(err.kind(), clap::error::ErrorKind::ValueValidation);

        let cli = Cli::try_parse_from(["quality-loop", "iterate", "reqs.md", "-m", "1"])
            .expect("one round");
        assert!(matches!(cli.command, Command::Iterate { max_rounds: 1, .. }));
    }

    #[test]
    fn rejects_unknown_artifact_type() {
        assert!(
            Cli::try_parse_from(["quality-loop", "analyse", "x.md", "-t", "novel"]).is_err()
        );
    }

    #[test]
    fn artifact_kind_maps_to_wire_type() {
        assert_eq!(
            ArtifactType::from(ArtifactKind::RequirementsDocument),
            ArtifactType::RequirementsDocument
        );
    }
}
