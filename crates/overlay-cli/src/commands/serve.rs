use crate::cli::ServeArgs;
use crate::config::PartialViewerConfig;
use crate::error::{CliError, Result};
use crate::sources::HttpSources;
use overlay::bridge::{BridgeHandler, Event, EventEmitter};
use overlay::engine::lifecycle::Viewer;
use overlay::engine::source::SourceProvider;
use std::rc::Rc;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tokio::task::{self, JoinError, JoinSet, LocalSet};
use tracing::{debug, error, info, warn};

pub async fn run(args: ServeArgs) -> Result<()> {
    let config = PartialViewerConfig::discover(args.config.as_deref())?.merge_with_cli(&args)?;
    debug!("Effective viewer configuration: {:?}", config);

    let viewer = Rc::new(Viewer::headless(config, HttpSources::new()?));
    let local = LocalSet::new();
    local
        .run_until(serve(viewer, tokio::io::stdin(), tokio::io::stdout()))
        .await?;
    info!("Input closed; all commands handled.");
    Ok(())
}

/// Reads one JSON command per line from `input` and writes one JSON event per line
/// to `output` until the input ends and every command has finished.
///
/// Commands run concurrently, so a slow load does not hold back later mutations.
/// Must be driven inside a [`LocalSet`]. Returns the writer once drained.
pub async fn serve<P, R, W>(viewer: Rc<Viewer<P>>, input: R, mut output: W) -> Result<W>
where
    P: SourceProvider + 'static,
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin + 'static,
{
    let (tx, mut rx) = mpsc::unbounded_channel::<Event>();
    let writer = task::spawn_local(async move {
        while let Some(event) = rx.recv().await {
            let mut line = serde_json::to_vec(&event).map_err(|e| CliError::Other(e.into()))?;
            line.push(b'\n');
            output.write_all(&line).await?;
            output.flush().await?;
        }
        Ok::<W, CliError>(output)
    });

    let emitter = EventEmitter::with_callback(move |event| {
        if tx.send(event).is_err() {
            warn!("Event writer has stopped; dropping event.");
        }
    });
    let handler = Rc::new(BridgeHandler::new(viewer, emitter));
    handler.start();

    let mut lines = BufReader::new(input).lines();
    let mut running = JoinSet::new();
    let read_result = loop {
        tokio::select! {
            line = lines.next_line() => match line {
                Ok(Some(line)) => {
                    let message = line.trim().to_string();
                    if message.is_empty() {
                        continue;
                    }
                    let handler = Rc::clone(&handler);
                    running.spawn_local(async move { handler.handle_message(&message).await });
                }
                Ok(None) => break Ok(()),
                Err(e) => break Err(CliError::Io(e)),
            },
            Some(finished) = running.join_next(), if !running.is_empty() => reap(finished),
        }
    };
    debug!("Waiting for {} in-flight command(s).", running.len());
    while let Some(finished) = running.join_next().await {
        reap(finished);
    }

    // Dropping the handler releases the viewer and with it every sender.
    drop(handler);
    let output = writer.await.map_err(|e| CliError::Other(e.into()))??;
    read_result?;
    Ok(output)
}

/// A command task that died without reporting is logged; the session goes on.
fn reap(finished: std::result::Result<(), JoinError>) {
    match finished {
        Ok(()) => {}
        Err(e) if e.is_panic() => error!("Command task panicked: {}", e),
        Err(e) => warn!("Command task did not finish: {}", e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use overlay::bridge::ItemView;
    use overlay::engine::config::{RCSB_PDB_TEMPLATE, ViewerConfig, expand_template};
    use overlay::engine::source::{MemorySources, SourceError};

    fn pdb_text() -> String {
        [[0.0, 0.0, 0.0], [3.8, 0.0, 0.0], [5.1, 3.5, 0.2], [3.0, 6.1, 1.9]]
            .iter()
            .enumerate()
            .map(|(i, p)| {
                format!(
                    "ATOM  {:>5}  CA  ALA A{:>4}    {:>8.3}{:>8.3}{:>8.3}  1.00  0.00           C",
                    i + 1,
                    i + 1,
                    p[0],
                    p[1],
                    p[2]
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    const BROKEN_URL: &str = "mem://broken.map";

    /// Panics for one URL and serves everything else from memory.
    struct BrokenMirror(MemorySources);

    impl SourceProvider for BrokenMirror {
        async fn fetch(&self, url: &str) -> std::result::Result<Vec<u8>, SourceError> {
            if url == BROKEN_URL {
                panic!("mirror crashed while serving {url}");
            }
            self.0.fetch(url).await
        }
    }

    async fn run_session(input: &'static str) -> Vec<Event> {
        let sources =
            MemorySources::new().with(expand_template(RCSB_PDB_TEMPLATE, "1CRN"), pdb_text());
        let viewer = Rc::new(Viewer::headless(ViewerConfig::default(), BrokenMirror(sources)));
        let local = LocalSet::new();
        let output = local
            .run_until(serve(viewer, input.as_bytes(), Vec::new()))
            .await
            .unwrap();
        String::from_utf8(output)
            .unwrap()
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect()
    }

    #[tokio::test]
    async fn session_emits_ready_then_one_event_per_command() {
        let events = run_session(
            "{\"action\":\"frobnicate\"}\n\n{\"action\":\"loadStructure\",\"pdbId\":\"1crn\"}\n",
        )
        .await;

        assert_eq!(events.first(), Some(&Event::Ready));
        let errors: Vec<_> = events
            .iter()
            .filter_map(|e| match e {
                Event::Error { action, .. } => Some(action.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(errors, vec!["frobnicate"]);

        let loaded: Vec<_> = events
            .iter()
            .filter_map(|e| match e {
                Event::StructureLoaded { item } => Some(item),
                _ => None,
            })
            .collect();
        assert_eq!(loaded.len(), 1);
        assert!(matches!(
            loaded[0],
            ItemView::Structure { id, is_reference: true, .. } if id.as_str() == "1CRN"
        ));
        assert!(events.iter().any(|e| matches!(e, Event::ItemsChanged { items } if items.len() == 1)));
    }

    #[tokio::test]
    async fn empty_input_only_announces_readiness() {
        assert_eq!(run_session("").await, vec![Event::Ready]);
    }

    #[tokio::test]
    async fn invalid_json_is_reported_as_unknown_action() {
        let events = run_session("not json\n").await;
        assert_eq!(events.len(), 2);
        assert!(matches!(&events[1], Event::Error { action, .. } if action == "unknown"));
    }

    #[tokio::test]
    async fn crashed_command_does_not_end_the_session() {
        let events = run_session(
            "{\"action\":\"loadVolumeFromSource\",\"url\":\"mem://broken.map\"}\n\
             {\"action\":\"loadStructure\",\"pdbId\":\"1crn\"}\n\
             {\"action\":\"getItems\"}\n",
        )
        .await;

        assert_eq!(events.first(), Some(&Event::Ready));
        assert!(events.iter().any(|e| matches!(e, Event::StructureLoaded { .. })));
        assert!(!events.iter().any(|e| matches!(e, Event::MapLoaded { .. })));
        assert!(
            events
                .iter()
                .any(|e| matches!(e, Event::ItemsChanged { items } if items.len() == 1))
        );
    }
}
