//! Session management commands.

use anyhow::Result;

use valet::session::{Session, SessionStore};

pub async fn list(config_path: &str, archived: bool) -> Result<()> {
    let ctx = super::bootstrap(config_path).await?;
    let mut sessions = if archived {
        ctx.store.list_archived().await?
    } else {
        ctx.store.list().await?
    };

    if sessions.is_empty() {
        println!("No sessions.");
        return Ok(());
    }

    sessions.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
    for s in sessions {
        let sticky = if s.sticky { " [sticky]" } else { "" };
        println!(
            "{}  {:<40} agent={:<16} messages={:<4} updated={}{}",
            s.id,
            s.title,
            s.agent_id,
            s.messages.len(),
            s.updated_at.format("%Y-%m-%d %H:%M"),
            sticky
        );
    }

    Ok(())
}

pub async fn archive(id: &str, config_path: &str) -> Result<()> {
    let ctx = super::bootstrap(config_path).await?;
    Session::archive(id, ctx.store.as_ref()).await?;
    println!("Archived session {id}");
    Ok(())
}

pub async fn restore(id: &str, config_path: &str) -> Result<()> {
    let ctx = super::bootstrap(config_path).await?;
    Session::restore(id, ctx.store.as_ref()).await?;
    println!("Restored session {id}");
    Ok(())
}

pub async fn delete(id: &str, config_path: &str) -> Result<()> {
    let ctx = super::bootstrap(config_path).await?;
    Session::delete(id, ctx.store.as_ref()).await?;
    println!("Deleted session {id}");
    Ok(())
}
