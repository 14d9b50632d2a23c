use anyhow::Result;

use crate::context::{ContextManager, Tier};
use crate::history::HistoryManager;
use crate::resolve::AdminActions;
use crate::util::{print_notice, print_success};

pub fn run_admin(actions: &AdminActions, history: &HistoryManager, ctx: &ContextManager) -> Result<()> {
    if actions.clear_history {
        if history.clear()? {
            print_success("Chat history cleared.");
        } else {
            print_notice("No chat history to clear.");
        }
    }
    if actions.clear_local {
        clear_context(ctx, Tier::Local)?;
    }
    if let Some(text) = &actions.set_local {
        set_context(ctx, Tier::Local, text)?;
    }
    if actions.clear_general {
        clear_context(ctx, Tier::General)?;
    }
    if let Some(text) = &actions.set_general {
        set_context(ctx, Tier::General, text)?;
    }
    Ok(())
}

fn clear_context(ctx: &ContextManager, tier: Tier) -> Result<()> {
    if ctx.clear(tier)? {
        print_success(&format!("{} context cleared.", capitalized(tier)));
    } else {
        print_notice(&format!("No {} context to clear.", tier.name()));
    }
    Ok(())
}

fn set_context(ctx: &ContextManager, tier: Tier, text: &str) -> Result<()> {
    ctx.set(tier, text)?;
    if text.trim().is_empty() {
        print_notice(&format!("{} context is now empty.", capitalized(tier)));
        return Ok(());
    }
    print_success(&format!(
        "{} context saved to {}.",
        capitalized(tier),
        ctx.path(tier).display()
    ));
    let scope = match tier {
        Tier::Local => "every call in this directory",
        Tier::General => "every call",
    };
    println!("It will be used for {scope} unless --disable-context is given.");
    Ok(())
}

fn capitalized(tier: Tier) -> &'static str {
    match tier {
        Tier::Local => "Local",
        Tier::General => "General",
    }
}
