//! Interactive chat command.

use anyhow::Result;
use futures::StreamExt;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines, Stdin, Stdout};

use valet::event::Event;
use valet::provider::EventStream;
use valet::session::{CreateOptions, Session};

use std::sync::Arc;

pub async fn run(agent_id: &str, config_path: &str) -> Result<()> {
    let ctx = super::bootstrap(config_path).await?;
    let agent = ctx.agents.load(agent_id).await?;
    let session = Session::create(
        &agent,
        CreateOptions::default(),
        &ctx.config,
        Arc::clone(&ctx.tools),
        Arc::clone(&ctx.store),
    )
    .await?;

    println!("Chat with {} ({} via {})", agent.name, agent.model, agent.provider);
    println!("Session {} (/stop cancels a turn, /exit quits)", session.id());
    println!();

    let stdin = BufReader::new(tokio::io::stdin());
    let mut lines = stdin.lines();
    let mut stdout = tokio::io::stdout();

    loop {
        stdout.write_all(b"> ").await?;
        stdout.flush().await?;

        let Some(input) = lines.next_line().await? else {
            println!();
            break;
        };

        let input = input.trim();
        if input.is_empty() || input == "/stop" {
            continue;
        }
        if input == "/exit" || input == "/quit" {
            break;
        }

        match session.send(input) {
            Ok(stream) => stream_turn(&session, stream, &mut lines, &mut stdout).await?,
            Err(e) => eprintln!("Error: {e}"),
        }
    }

    Ok(())
}

/// Forward turn events to stdout while watching stdin for "/stop".
async fn stream_turn(
    session: &Session,
    mut stream: EventStream,
    lines: &mut Lines<BufReader<Stdin>>,
    stdout: &mut Stdout,
) -> Result<()> {
    loop {
        tokio::select! {
            next = stream.next() => {
                let Some(event) = next else { break };
                match event {
                    Event::TextChunk { content } => {
                        stdout.write_all(content.as_bytes()).await?;
                        stdout.flush().await?;
                    }
                    Event::ToolStart { tool, .. } => {
                        stdout
                            .write_all(format!("\n[{tool} running]\n").as_bytes())
                            .await?;
                        stdout.flush().await?;
                    }
                    Event::ToolDone { tool, error, .. } => {
                        let line = match error {
                            Some(e) => format!("[{tool} failed: {e}]\n"),
                            None => format!("[{tool} done]\n"),
                        };
                        stdout.write_all(line.as_bytes()).await?;
                        stdout.flush().await?;
                    }
                    Event::Error { message } => {
                        eprintln!("\nError: {message}");
                    }
                    Event::Done | Event::SessionId { .. } => {}
                }
            }
            line = lines.next_line() => {
                match line? {
                    Some(l) if l.trim() == "/stop" => session.stop(),
                    Some(_) => {}
                    None => {
                        session.stop();
                        break;
                    }
                }
            }
        }
    }

    stdout.write_all(b"\n").await?;
    stdout.flush().await?;
    Ok(())
}
