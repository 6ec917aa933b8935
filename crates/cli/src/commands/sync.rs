//! `parley sync` — Reconcile the local history cache with the session store.

use parley_history::SyncReport;

pub async fn run() -> anyhow::Result<()> {
    let config = super::load_config()?;
    let service = super::open_service(&config).await?;

    // Opening the service already reconciled once; a second pass catches
    // anything written since.
    let startup = service.startup_report().clone();
    let again = service.reconcile().await?;

    println!("🔄 History sync");
    print_report(&startup);
    if !again.is_clean() {
        print_report(&again);
    }
    println!("   {} sessions in local history", service.list_sessions().await.len());
    Ok(())
}

fn print_report(report: &SyncReport) {
    if report.is_clean() {
        println!("   ✅ Local history matches the store ({} entries refreshed)", report.refreshed);
        return;
    }
    println!("   Repaired {} divergences:", report.repairs());
    for id in &report.added {
        println!("     + {id} (missing locally)");
    }
    for id in &report.removed {
        println!("     - {id} (deleted from store)");
    }
    for id in &report.retitled {
        println!("     ~ {id} (title taken from store)");
    }
}
