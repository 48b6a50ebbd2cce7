//! The vidq binary: download videos into the library, optionally
//! transcribing and analyzing them afterwards.

use std::sync::Arc;

use anyhow::{anyhow, bail, Context};
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use vidq_media::{HttpAnalyzer, Library};
use vidq_models::{JobSpec, Quality, QueueClass, TaskKind};
use vidq_queue::{QueueConfig, QueueManager, TracingSink};
use vidq_worker::{
    FfmpegProcessor, LibraryImporter, ModelAnalyzer, TaskRunner, WhisperTranscriber, WorkerConfig,
    YtDlpDownloader,
};

const USAGE: &str = "\
Usage: vidq [OPTIONS] <URL>...

Options:
  --quality <best|p2160|p1080|p720|p480>   Download quality ceiling
  --browser <name>        Pass --cookies-from-browser to yt-dlp
  --transcribe            Transcribe each video after import
  --analyze               Analyze the transcript (implies --transcribe)
  --language <code>       Transcription language hint
  --model <name>          Analysis model (default: llama3.2)
  --openai                Use the OpenAI-compatible endpoint (needs OPENAI_API_KEY)";

#[derive(Debug, Default)]
struct CliArgs {
    urls: Vec<String>,
    quality: Option<Quality>,
    browser: Option<String>,
    transcribe: bool,
    analyze: bool,
    language: Option<String>,
    model: Option<String>,
    openai: bool,
}

fn parse_args(mut args: impl Iterator<Item = String>) -> Result<CliArgs, String> {
    let mut parsed = CliArgs::default();

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--quality" => {
                let value = args.next().ok_or("--quality needs a value")?;
                parsed.quality =
                    Some(Quality::parse(&value).ok_or_else(|| format!("unknown quality '{value}'"))?);
            }
            "--browser" => parsed.browser = Some(args.next().ok_or("--browser needs a value")?),
            "--transcribe" => parsed.transcribe = true,
            "--analyze" => {
                parsed.analyze = true;
                parsed.transcribe = true;
            }
            "--language" => parsed.language = Some(args.next().ok_or("--language needs a value")?),
            "--model" => parsed.model = Some(args.next().ok_or("--model needs a value")?),
            "--openai" => parsed.openai = true,
            other if other.starts_with("--") => return Err(format!("unknown option '{other}'")),
            url => parsed.urls.push(url.to_string()),
        }
    }

    if parsed.urls.is_empty() {
        return Err("no URLs given".to_string());
    }
    Ok(parsed)
}

fn init_tracing() {
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("vidq=info"));

    if use_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(env_filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_ansi(true)
                    .with_target(false)
                    .with_file(false)
                    .with_line_number(false),
            )
            .with(env_filter)
            .init();
    }
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    init_tracing();

    let args = match parse_args(std::env::args().skip(1)) {
        Ok(args) => args,
        Err(message) => {
            eprintln!("vidq: {message}\n\n{USAGE}");
            std::process::exit(2);
        }
    };

    if let Err(err) = run(args).await {
        error!("{err:#}");
        std::process::exit(1);
    }
}

async fn run(args: CliArgs) -> anyhow::Result<()> {
    let config = WorkerConfig::from_env();
    tokio::fs::create_dir_all(&config.work_dir)
        .await
        .with_context(|| format!("creating work dir {}", config.work_dir.display()))?;
    tokio::fs::create_dir_all(&config.library_dir)
        .await
        .with_context(|| format!("creating library dir {}", config.library_dir.display()))?;

    let library = Library::new(config.library_dir.clone());
    let analyzer = HttpAnalyzer::new(config.ollama_url.clone(), config.openai_url.clone());
    let runner = Arc::new(TaskRunner::new(
        Arc::new(YtDlpDownloader::new(config.work_dir.clone())),
        Arc::new(LibraryImporter::new(library)),
        Arc::new(FfmpegProcessor),
        Arc::new(WhisperTranscriber::new(config.work_dir.clone())),
        Arc::new(ModelAnalyzer::new(analyzer)),
    ));

    let manager = QueueManager::new(QueueConfig::from_env(), Arc::new(TracingSink));
    manager.start(runner);

    let quality = args.quality.unwrap_or(config.default_quality);
    let (provider, api_key) = if args.openai {
        let key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| anyhow!("--openai requires OPENAI_API_KEY"))?;
        (vidq_models::AnalysisProvider::OpenAi, Some(key))
    } else {
        (vidq_models::AnalysisProvider::Ollama, None)
    };
    let model = args.model.unwrap_or_else(|| "llama3.2".to_string());

    // One batch job per URL: probe, download, import.
    let mut batch_ids = Vec::new();
    for url in &args.urls {
        let spec = JobSpec::for_url(
            url,
            vec![
                TaskKind::GetInfo,
                TaskKind::Download {
                    quality,
                    browser: args.browser.clone(),
                },
                TaskKind::Import,
            ],
        );
        let id = manager.add_job(QueueClass::Batch, spec).await?;
        info!(job_id = %id, url = %url, "Queued download");
        batch_ids.push((id, url.clone()));
    }

    let mut failures = 0usize;
    let mut analysis_ids = Vec::new();

    for (id, url) in batch_ids {
        let status = manager.wait_for_terminal(&id).await?;
        let job = manager
            .get_job(&id)
            .await
            .ok_or_else(|| anyhow!("job {id} vanished"))?;

        if !matches!(status, vidq_models::JobStatus::Completed) {
            error!(
                job_id = %id,
                url = %url,
                error = job.error.as_deref().unwrap_or("unknown"),
                "Download pipeline failed"
            );
            failures += 1;
            continue;
        }

        info!(
            job_id = %id,
            title = job.display_name.as_deref().unwrap_or(&url),
            "Imported video"
        );

        if args.transcribe {
            let video_id = job
                .context
                .video_id
                .clone()
                .ok_or_else(|| anyhow!("job {id} completed without a library id"))?;
            let mut tasks = vec![TaskKind::Transcribe {
                model: Default::default(),
                language: args.language.clone(),
            }];
            if args.analyze {
                tasks.push(TaskKind::Analyze {
                    provider,
                    model: model.clone(),
                    api_key: api_key.clone(),
                });
            }
            let spec = JobSpec::for_video(video_id, tasks);
            let analysis_id = manager.add_job(QueueClass::Analysis, spec).await?;
            info!(job_id = %analysis_id, "Queued analysis");
            analysis_ids.push(analysis_id);
        }
    }

    for id in analysis_ids {
        let status = manager.wait_for_terminal(&id).await?;
        if !matches!(status, vidq_models::JobStatus::Completed) {
            let job = manager.get_job(&id).await;
            error!(
                job_id = %id,
                error = job
                    .and_then(|j| j.error)
                    .unwrap_or_else(|| "unknown".to_string()),
                "Analysis pipeline failed"
            );
            failures += 1;
        }
    }

    manager.shutdown();

    if failures > 0 {
        bail!("{failures} job(s) failed");
    }
    info!("All jobs completed");
    Ok(())
}
