//! Command implementations for the CLI interface.
//!
//! Each subcommand drives the same forms and services as the TUI, so a church
//! or member added from the shell goes through identical validation, guarded
//! field confirmation and history recording.

use std::path::{Path, PathBuf};

use chrono::{Local, TimeZone, Utc};
use clap::Subcommand;
use clap_complete::{generate, Shell};
use tracing::info;

use crate::church::Address;
use crate::db::*;
use crate::fields::*;
use crate::forms::activity_form::ActivityForm;
use crate::forms::church_form::ChurchForm;
use crate::forms::guard::ChangeOutcome;
use crate::forms::member_form::MemberForm;
use crate::forms::validate::{mask_cnpj, mask_cpf, mask_phone, mask_zip, non_empty, parse_date, FieldErrors};
use crate::forms::SubmitError;
use crate::postal::PostalDirectory;
use crate::service::{ChurchQuery, ChurchService, MemberQuery, MemberService};
use crate::session::{ActiveContext, Actor};
use crate::settings::{Settings, POSTAL_FILE};
use crate::tui::run::{run_context_menu, run_tui};
use crate::views::timeline::{MemberTimeline, TimelineKind};

#[derive(Subcommand)]
pub enum Commands {
    /// Launch the interactive UI interface.
    Ui,

    /// Pick the active church and branch.
    Select,

    /// Manage churches.
    Churches {
        #[command(subcommand)]
        action: ChurchAction,
    },

    /// Manage branches (congregations) of a church.
    Branches {
        #[command(subcommand)]
        action: BranchAction,
    },

    /// Manage members.
    Members {
        #[command(subcommand)]
        action: MemberAction,
    },

    /// Record and convert visitors.
    Visitors {
        #[command(subcommand)]
        action: VisitorAction,
    },

    /// Schedule and list activities.
    Activities {
        #[command(subcommand)]
        action: ActivityAction,
    },

    /// Manage denominations.
    Denominations {
        #[command(subcommand)]
        action: DenominationAction,
    },

    /// Print denominations, their churches and branches as a tree.
    Hierarchy,

    /// Generate shell completion scripts.
    Completions {
        /// Shell to generate completions for.
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Subcommand)]
pub enum ChurchAction {
    /// List churches with filters, sort and paging.
    List {
        /// Free text matched against name, city and email.
        #[arg(long)]
        search: Option<String>,
        /// Two-letter state code.
        #[arg(long)]
        state: Option<String>,
        #[arg(long, value_enum)]
        plan: Option<Plan>,
        #[arg(long, value_enum)]
        status: Option<ChurchStatus>,
        #[arg(long, value_enum, default_value_t = ChurchSortKey::Name)]
        sort: ChurchSortKey,
        /// Sort descending.
        #[arg(long)]
        desc: bool,
        #[arg(long, default_value_t = 1)]
        page: usize,
        #[arg(long)]
        page_size: Option<usize>,
    },
    /// Show one church with its statistics and branches.
    View { id: u64 },
    /// Register a church.
    Add {
        name: String,
        #[arg(long)]
        email: String,
        #[arg(long)]
        short_name: Option<String>,
        #[arg(long)]
        cnpj: Option<String>,
        #[arg(long)]
        phone: Option<String>,
        /// Postal code; known codes fill street, neighborhood, city and state.
        #[arg(long)]
        zip: Option<String>,
        #[arg(long)]
        street: Option<String>,
        #[arg(long)]
        number: Option<String>,
        #[arg(long)]
        complement: Option<String>,
        #[arg(long)]
        neighborhood: Option<String>,
        #[arg(long)]
        city: Option<String>,
        #[arg(long)]
        state: Option<String>,
        /// Denomination id.
        #[arg(long)]
        denomination: Option<u64>,
        #[arg(long, value_enum, default_value_t = Plan::Basic)]
        plan: Plan,
        #[arg(long, value_enum, default_value_t = ChurchStatus::Active)]
        status: ChurchStatus,
    },
    /// Delete a church without members.
    Delete { id: u64 },
    /// Apply one action to several churches.
    Batch {
        #[arg(value_enum)]
        action: BatchAction,
        #[arg(required = true)]
        ids: Vec<u64>,
    },
    /// Attach a logo or cover image.
    Upload {
        id: u64,
        #[arg(value_enum)]
        kind: AssetKind,
        file: PathBuf,
    },
    /// Remove a logo or cover image.
    RemoveAsset {
        id: u64,
        #[arg(value_enum)]
        kind: AssetKind,
    },
}

#[derive(Subcommand)]
pub enum BranchAction {
    /// Add a branch to a church.
    Add {
        name: String,
        /// Church id; defaults to the active church.
        #[arg(long)]
        church: Option<u64>,
        #[arg(long)]
        city: Option<String>,
        #[arg(long)]
        state: Option<String>,
    },
    /// List branches of a church.
    List {
        #[arg(long)]
        church: Option<u64>,
    },
}

#[derive(Subcommand)]
pub enum MemberAction {
    /// List members of the active (or given) church.
    List {
        #[arg(long)]
        church: Option<u64>,
        #[arg(long)]
        branch: Option<u64>,
        #[arg(long)]
        search: Option<String>,
        #[arg(long, value_enum)]
        status: Option<MembershipStatus>,
        #[arg(long, default_value_t = 1)]
        page: usize,
        #[arg(long)]
        page_size: Option<usize>,
    },
    /// Add a member.
    Add {
        full_name: String,
        #[arg(long)]
        church: Option<u64>,
        #[arg(long)]
        branch: Option<u64>,
        #[arg(long)]
        email: Option<String>,
        #[arg(long)]
        phone: Option<String>,
        #[arg(long)]
        cpf: Option<String>,
        /// YYYY-MM-DD.
        #[arg(long)]
        birth_date: Option<String>,
        #[arg(long, value_enum)]
        gender: Option<Gender>,
        #[arg(long, value_enum)]
        marital: Option<MaritalStatus>,
        #[arg(long, value_enum)]
        status: Option<MembershipStatus>,
        #[arg(long, value_enum)]
        function: Option<MinisterialFunction>,
        /// YYYY-MM-DD.
        #[arg(long)]
        membership_date: Option<String>,
        #[arg(long)]
        zip: Option<String>,
        /// Grant system access with this role.
        #[arg(long, value_enum)]
        role: Option<SystemRole>,
        /// Login email for system access.
        #[arg(long)]
        user_email: Option<String>,
    },
    /// Show one member.
    View { id: u64 },
    /// Change membership status.
    Status {
        id: u64,
        #[arg(value_enum)]
        status: MembershipStatus,
        #[arg(long)]
        reason: Option<String>,
        /// Confirm a change that needs confirmation.
        #[arg(long)]
        yes: bool,
    },
    /// Change ministerial function.
    Function {
        id: u64,
        #[arg(value_enum)]
        function: MinisterialFunction,
        #[arg(long)]
        reason: Option<String>,
        #[arg(long)]
        yes: bool,
    },
    /// Print the status and function timeline.
    History { id: u64 },
}

#[derive(Subcommand)]
pub enum VisitorAction {
    /// Record a visitor.
    Add {
        full_name: String,
        #[arg(long)]
        church: Option<u64>,
        #[arg(long)]
        phone: Option<String>,
        #[arg(long)]
        email: Option<String>,
        /// YYYY-MM-DD, defaults to today.
        #[arg(long)]
        first_visit: Option<String>,
    },
    /// List visitors of a church.
    List {
        #[arg(long)]
        church: Option<u64>,
    },
    /// Turn a visitor into a member.
    Convert { id: u64 },
}

#[derive(Subcommand)]
pub enum ActivityAction {
    /// Schedule an activity.
    Add {
        name: String,
        #[arg(long)]
        church: Option<u64>,
        #[arg(long)]
        branch: Option<u64>,
        /// "YYYY-MM-DD HH:MM".
        #[arg(long)]
        starts: String,
        /// "YYYY-MM-DD HH:MM".
        #[arg(long)]
        ends: String,
        #[arg(long)]
        location: Option<String>,
        #[arg(long)]
        description: Option<String>,
        #[arg(long)]
        max: Option<u32>,
        #[arg(long, value_enum)]
        recurrence: Option<Recurrence>,
        /// Last date of a recurring activity.
        #[arg(long)]
        until: Option<String>,
    },
    /// List activities of a church.
    List {
        #[arg(long)]
        church: Option<u64>,
    },
}

#[derive(Subcommand)]
pub enum DenominationAction {
    Add {
        name: String,
        #[arg(long)]
        abbreviation: Option<String>,
        #[arg(long)]
        city: Option<String>,
    },
    List,
}

fn fail(message: impl std::fmt::Display) -> ! {
    eprintln!("Error: {}", message);
    std::process::exit(1);
}

/// Church id from the flag or the active context.
fn church_or_active(explicit: Option<u64>, settings: &Settings) -> u64 {
    match explicit.or(settings.active.church_id) {
        Some(id) => id,
        None => fail("no church given and no active church; use --church or `chm select`"),
    }
}

fn report_submit_error(err: SubmitError, errors: &FieldErrors) -> ! {
    if let SubmitError::Invalid { .. } = err {
        eprintln!("Error: {}", err);
        for (field, message) in errors.iter() {
            eprintln!("  {:<18} {}", field, message);
        }
        std::process::exit(1);
    }
    fail(err.toast())
}

fn fmt_ts(ts: i64) -> String {
    Utc.timestamp_opt(ts, 0).single().map(|d| d.to_rfc3339()).unwrap_or_else(|| "-".into())
}

fn dash(value: Option<&str>) -> &str {
    value.filter(|v| !v.is_empty()).unwrap_or("-")
}

pub fn cmd_ui(data_dir: &Path, db: Database, settings: Settings) {
    if let Err(e) = run_tui(data_dir, db, settings) {
        fail(e);
    }
}

pub fn cmd_select(data_dir: &Path, db: &Database, settings: &mut Settings) {
    let chosen = match run_context_menu(db, settings.active) {
        Ok(chosen) => chosen,
        Err(e) => fail(e),
    };
    let Some(ids) = chosen else {
        println!("Selection unchanged.");
        return;
    };
    settings.active = ids;
    if let Err(e) = settings.save(data_dir) {
        fail(format!("could not save settings: {}", e));
    }
    let mut context = ActiveContext::new(ids);
    println!("Active: {}", context.resolve(db).label());
}

pub fn cmd_churches(db: &mut Database, data_dir: &Path, settings: &Settings, action: ChurchAction) {
    match action {
        ChurchAction::List { search, state, plan, status, sort, desc, page, page_size } => {
            let query = ChurchQuery {
                search: search.unwrap_or_default(),
                state: state.map(|s| s.to_uppercase()),
                plan,
                status,
                sort,
                direction: if desc { SortDirection::Desc } else { SortDirection::Asc },
                page: page.max(1),
                page_size: page_size.unwrap_or(settings.page_size).max(1),
            };
            let page = db.list_churches(&query).unwrap_or_else(|e| fail(e.user_message()));
            if page.results.is_empty() {
                println!("No churches found.");
                return;
            }
            print_church_table(&page.results);
            let pages = page.count.div_ceil(query.page_size).max(1);
            println!("\nPage {}/{} ({} churches)", query.page, pages, page.count);
        }
        ChurchAction::View { id } => {
            let church = db.get_church(id).unwrap_or_else(|e| fail(e.user_message()));
            let denomination = church
                .denomination_id
                .and_then(|d| db.denominations.iter().find(|x| x.id == d))
                .map(|d| d.name.clone());
            println!("ID:           {}", church.id);
            println!("Name:         {}", church.name);
            println!("Short name:   {}", dash(church.short_name.as_deref()));
            println!("Denomination: {}", dash(denomination.as_deref()));
            println!("CNPJ:         {}", dash(church.cnpj.as_deref()));
            println!("Email:        {}", church.email);
            println!("Phone:        {}", dash(church.phone.as_deref()));
            println!("Address:      {}", format_address(&church.address));
            println!("Plan:         {}", format_plan(church.plan));
            println!("Status:       {}", format_church_status(church.status));
            println!("Logo:         {}", dash(church.logo.as_deref()));
            println!("Cover:        {}", dash(church.cover_image.as_deref()));
            println!("Created UTC:  {}", fmt_ts(church.created_at_utc));
            println!("Updated UTC:  {}", fmt_ts(church.updated_at_utc));

            if let Ok(stats) = db.church_statistics(id) {
                println!("\nMembers: {}  Visitors: {} ({} converted)  Activities: {}  Branches: {}",
                    stats.members_total, stats.visitors_total, stats.visitors_converted,
                    stats.activities_total, stats.branches_total);
                for (status, count) in &stats.members_by_status {
                    println!("  {:<12} {}", format_membership_status(*status), count);
                }
            }
            if let Ok(branches) = db.list_branches(id) {
                if !branches.is_empty() {
                    println!("\nBranches:");
                    for b in branches {
                        let marker = if b.is_active { "" } else { " (inactive)" };
                        println!("  #{:<4} {}{}", b.id, b.name, marker);
                    }
                }
            }
        }
        ChurchAction::Add {
            name, email, short_name, cnpj, phone, zip, street, number, complement,
            neighborhood, city, state, denomination, plan, status,
        } => {
            let mut form = ChurchForm::new(&db.denominations);
            form.name.set(&name);
            form.email.set(&email);
            if let Some(v) = zip {
                form.zip_code.set(&mask_zip(&v));
                let postal = PostalDirectory::load(&data_dir.join(POSTAL_FILE));
                form.autofill_address(&postal);
            }
            for (input, value) in [
                (&mut form.short_name, short_name),
                (&mut form.street, street),
                (&mut form.number, number),
                (&mut form.complement, complement),
                (&mut form.neighborhood, neighborhood),
                (&mut form.city, city),
                (&mut form.state, state.map(|s| s.to_uppercase())),
            ] {
                if let Some(v) = value {
                    input.set(&v);
                }
            }
            if let Some(v) = cnpj {
                form.cnpj.set(&mask_cnpj(&v));
            }
            if let Some(v) = phone {
                form.phone.set(&mask_phone(&v));
            }
            if !form.select_denomination(denomination) {
                fail(format!("denomination {} not found", denomination.unwrap_or_default()));
            }
            form.select_plan(plan);
            form.select_status(status);
            match form.submit(db) {
                Ok(church) => println!("Added church {}: {}", church.id, church.name),
                Err(e) => report_submit_error(e, &form.errors),
            }
        }
        ChurchAction::Delete { id } => {
            let church = db.get_church(id).unwrap_or_else(|e| fail(e.user_message()));
            if let Err(e) = db.delete_church(id) {
                fail(e.user_message());
            }
            println!("Deleted church {}: {}", id, church.name);
        }
        ChurchAction::Batch { action, ids } => {
            let report = db.batch(action, &ids).unwrap_or_else(|e| fail(e.user_message()));
            println!("{} succeeded, {} failed.", report.success_count, report.error_count);
            for err in &report.errors {
                println!("  {}", err);
            }
            if let Some(path) = report.output {
                println!("Exported to {}", path);
            }
        }
        ChurchAction::Upload { id, kind, file } => {
            if let Err(e) = db.upload_asset(id, kind, &file) {
                fail(e.user_message());
            }
            println!("Stored {} for church {}.", format_asset_kind(kind), id);
        }
        ChurchAction::RemoveAsset { id, kind } => {
            if let Err(e) = db.remove_asset(id, kind) {
                fail(e.user_message());
            }
            println!("Removed {} of church {}.", format_asset_kind(kind), id);
        }
    }
}

pub fn cmd_branches(db: &mut Database, settings: &Settings, action: BranchAction) {
    match action {
        BranchAction::Add { name, church, city, state } => {
            let church_id = church_or_active(church, settings);
            let address = Address {
                city: city.unwrap_or_default(),
                state: state.map(|s| s.to_uppercase()).unwrap_or_default(),
                ..Address::default()
            };
            let branch = db.create_branch(church_id, &name, address).unwrap_or_else(|e| fail(e.user_message()));
            println!("Added branch {}: {}", branch.id, branch.name);
        }
        BranchAction::List { church } => {
            let church_id = church_or_active(church, settings);
            let branches = db.list_branches(church_id).unwrap_or_else(|e| fail(e.user_message()));
            if branches.is_empty() {
                println!("No branches.");
                return;
            }
            println!("{:<6} {:<32} {:<20} {:<3} {}", "ID", "Name", "City", "UF", "Active");
            for b in branches {
                println!("{:<6} {:<32} {:<20} {:<3} {}",
                    b.id, truncate(&b.name, 32), truncate(&b.address.city, 20), b.address.state,
                    if b.is_active { "yes" } else { "no" });
            }
        }
    }
}

pub fn cmd_members(db: &mut Database, data_dir: &Path, settings: &Settings, action: MemberAction) {
    let actor_label = settings.actor.label();
    match action {
        MemberAction::List { church, branch, search, status, page, page_size } => {
            let query = MemberQuery {
                church_id: Some(church_or_active(church, settings)),
                branch_id: branch.or(if church.is_none() { settings.active.branch_id } else { None }),
                search: search.unwrap_or_default(),
                status,
                page: page.max(1),
                page_size: page_size.unwrap_or(settings.page_size).max(1),
            };
            let page = db.list_members(&query).unwrap_or_else(|e| fail(e.user_message()));
            if page.results.is_empty() {
                println!("No members found.");
                return;
            }
            print_member_table(&page.results);
            let pages = page.count.div_ceil(query.page_size).max(1);
            println!("\nPage {}/{} ({} members)", query.page, pages, page.count);
        }
        MemberAction::Add {
            full_name, church, branch, email, phone, cpf, birth_date, gender, marital,
            status, function, membership_date, zip, role, user_email,
        } => {
            let church_id = church_or_active(church, settings);
            db.get_church(church_id).unwrap_or_else(|e| fail(e.user_message()));
            let branches = db.list_branches(church_id).unwrap_or_default();
            let mut form = MemberForm::new(church_id, &settings.actor, &branches);
            form.full_name.set(&full_name);
            for (input, value) in [
                (&mut form.email, email),
                (&mut form.birth_date, birth_date),
                (&mut form.membership_date, membership_date),
            ] {
                if let Some(v) = value {
                    input.set(&v);
                }
            }
            if let Some(v) = phone {
                form.phone.set(&mask_phone(&v));
            }
            if let Some(v) = cpf {
                form.cpf.set(&mask_cpf(&v));
            }
            if let Some(v) = zip {
                form.zip_code.set(&mask_zip(&v));
                let postal = PostalDirectory::load(&data_dir.join(POSTAL_FILE));
                form.autofill_address(&postal);
            }
            form.select_gender(gender);
            if let Some(m) = marital {
                form.select_marital(m);
            }
            if !form.select_branch(branch) {
                fail(format!("branch {} does not belong to church {}", branch.unwrap_or_default(), church_id));
            }
            // New members take the chosen values without a confirmation step.
            if let Some(s) = status {
                form.request_status(s);
            }
            if let Some(f) = function {
                form.request_function(f);
            }
            if let Some(r) = role {
                form.create_system_user = true;
                if !form.select_role(r) {
                    fail(format!("you may not grant the role {}", format_role(r)));
                }
                form.user_email.set(user_email.as_deref().unwrap_or_default());
            }
            match form.submit(db, &actor_label) {
                Ok(member) => println!("Added member {}: {}", member.id, member.full_name),
                Err(e) => report_submit_error(e, &form.errors),
            }
        }
        MemberAction::View { id } => {
            let m = db.get_member(id).unwrap_or_else(|e| fail(e.user_message()));
            let name_of = |id: u64| db.member(id).map(|x| x.full_name.clone()).unwrap_or_else(|| format!("#{}", id));
            let today = Local::now().date_naive();
            println!("ID:             {}", m.id);
            println!("Name:           {}", m.full_name);
            println!("Church:         {}", db.church(m.church_id).map(|c| c.name.as_str()).unwrap_or("-"));
            println!("Branch:         {}", dash(m.branch_id.and_then(|b| db.branch(b)).map(|b| b.name.as_str())));
            println!("Status:         {}", format_membership_status(m.membership_status));
            println!("Function:       {}", format_function(m.ministerial_function));
            println!("CPF:            {}", dash(m.cpf.as_deref()));
            println!("Birth date:     {}", match (m.birth_date, m.age_on(today)) {
                (Some(d), Some(age)) => format!("{} ({} years)", d, age),
                (Some(d), None) => d.to_string(),
                _ => "-".into(),
            });
            println!("Gender:         {}", format_gender(m.gender));
            println!("Email:          {}", dash(m.email.as_deref()));
            println!("Phone:          {}", dash(m.phone.as_deref()));
            println!("Address:        {}", format_address(&m.address));
            println!("Marital status: {}", format_marital_status(m.marital_status));
            println!("Spouse:         {}", m.spouse_id.map(&name_of).unwrap_or_else(|| "-".into()));
            println!("Children:       {}", if m.children_ids.is_empty() {
                m.children_count.map(|c| c.to_string()).unwrap_or_else(|| "-".into())
            } else {
                m.children_ids.iter().map(|c| name_of(*c)).collect::<Vec<_>>().join(", ")
            });
            println!("Member since:   {}", m.membership_date.map(|d| d.to_string()).unwrap_or_else(|| "-".into()));
            println!("System access:  {}", match (m.system_role, m.user_email.as_deref()) {
                (Some(role), email) => format!("{} ({})", format_role(role), dash(email)),
                (None, _) => "-".into(),
            });
            println!("Updated UTC:    {}", fmt_ts(m.updated_at_utc));
        }
        MemberAction::Status { id, status, reason, yes } => {
            change_guarded(db, settings, &actor_label, id, reason, yes, |form| form.request_status(status));
        }
        MemberAction::Function { id, function, reason, yes } => {
            change_guarded(db, settings, &actor_label, id, reason, yes, |form| form.request_function(function));
        }
        MemberAction::History { id } => {
            let member = db.get_member(id).unwrap_or_else(|e| fail(e.user_message()));
            let timeline = MemberTimeline::load(id, db);
            println!("{} (current status: {})", member.full_name,
                timeline.current_status.as_deref().unwrap_or(format_membership_status(member.membership_status)));
            if timeline.is_empty() {
                println!("No history recorded.");
                return;
            }
            for entry in timeline.merged() {
                let kind = match entry.kind {
                    TimelineKind::Status => "status",
                    TimelineKind::Function => "function",
                };
                print!("{}  {:<8} {:<32} by {}", entry.when(), kind, entry.transition(), entry.by);
                match &entry.reason {
                    Some(r) => println!("  ({})", r),
                    None => println!(),
                }
            }
        }
    }
}

/// Run one guarded change through the member form and save it.
fn change_guarded(
    db: &mut Database,
    settings: &Settings,
    actor_label: &str,
    id: u64,
    reason: Option<String>,
    yes: bool,
    request: impl FnOnce(&mut MemberForm) -> ChangeOutcome,
) {
    let member = db.get_member(id).unwrap_or_else(|e| fail(e.user_message()));
    let branches = db.list_branches(member.church_id).unwrap_or_default();
    let mut form = MemberForm::edit(&member, &settings.actor, &branches, db);
    match request(&mut form) {
        ChangeOutcome::Unchanged => {
            println!("Nothing to change.");
            return;
        }
        ChangeOutcome::NeedsConfirmation => {
            let Some(view) = form.pending_view() else {
                fail("no pending change");
            };
            if !yes {
                eprintln!("Changing {} from {} to {} needs confirmation ({:?}).", member.full_name, view.current, view.next, view.severity);
                eprintln!("Re-run with --yes to apply it.");
                form.cancel_dialog();
                std::process::exit(1);
            }
            form.confirm_dialog(reason.and_then(|r| non_empty(&r)));
        }
        ChangeOutcome::Applied => {}
    }
    match form.submit(db, actor_label) {
        Ok(saved) => {
            info!(member_id = saved.id, "guarded change applied from cli");
            println!("{}: {} / {}", saved.full_name,
                format_membership_status(saved.membership_status), format_function(saved.ministerial_function));
        }
        Err(e) => report_submit_error(e, &form.errors),
    }
}

pub fn cmd_visitors(db: &mut Database, settings: &Settings, action: VisitorAction) {
    match action {
        VisitorAction::Add { full_name, church, phone, email, first_visit } => {
            let church_id = church_or_active(church, settings);
            let first_visit = match first_visit {
                Some(s) => parse_date(&s).unwrap_or_else(|| fail(format!("invalid date: {} (expected YYYY-MM-DD)", s))),
                None => Local::now().date_naive(),
            };
            let visitor = db
                .add_visitor(church_id, &full_name, phone.map(|p| mask_phone(&p)), email, first_visit)
                .unwrap_or_else(|e| fail(e.user_message()));
            println!("Recorded visitor {}: {}", visitor.id, visitor.full_name);
        }
        VisitorAction::List { church } => {
            let church_id = church_or_active(church, settings);
            let visitors = db.list_visitors(church_id);
            if visitors.is_empty() {
                println!("No visitors.");
                return;
            }
            println!("{:<6} {:<32} {:<16} {:<11} {}", "ID", "Name", "Phone", "First visit", "Member");
            for v in visitors {
                println!("{:<6} {:<32} {:<16} {:<11} {}",
                    v.id, truncate(&v.full_name, 32), dash(v.phone.as_deref()), v.first_visit,
                    v.converted_member_id.map(|m| format!("#{}", m)).unwrap_or_else(|| "-".into()));
            }
        }
        VisitorAction::Convert { id } => {
            let member = db
                .convert_visitor(id, &settings.actor.label())
                .unwrap_or_else(|e| fail(e.user_message()));
            println!("Visitor {} is now member {}: {}", id, member.id, member.full_name);
        }
    }
}

pub fn cmd_activities(db: &mut Database, settings: &Settings, action: ActivityAction) {
    match action {
        ActivityAction::Add { name, church, branch, starts, ends, location, description, max, recurrence, until } => {
            let church_id = church_or_active(church, settings);
            let branches = db.list_branches(church_id).unwrap_or_else(|e| fail(e.user_message()));
            let mut form = ActivityForm::new(church_id, &branches);
            form.name.set(&name);
            form.starts_at.set(&starts);
            form.ends_at.set(&ends);
            for (input, value) in [
                (&mut form.location, location),
                (&mut form.description, description),
                (&mut form.recurrence_end, until),
                (&mut form.max_participants, max.map(|m| m.to_string())),
            ] {
                if let Some(v) = value {
                    input.set(&v);
                }
            }
            if !form.select_branch(branch) {
                fail(format!("branch {} does not belong to church {}", branch.unwrap_or_default(), church_id));
            }
            if let Some(r) = recurrence {
                form.select_recurrence(r);
            }
            match form.submit(db) {
                Ok(activity) => println!("Scheduled activity {}: {}", activity.id, activity.name),
                Err(e) => report_submit_error(e, &form.errors),
            }
        }
        ActivityAction::List { church } => {
            let church_id = church_or_active(church, settings);
            let activities = db.list_activities(church_id).unwrap_or_else(|e| fail(e.user_message()));
            if activities.is_empty() {
                println!("No activities.");
                return;
            }
            println!("{:<6} {:<30} {:<16} {:<16} {:<12} {}", "ID", "Name", "Starts", "Ends", "Repeats", "Location");
            for a in activities {
                println!("{:<6} {:<30} {:<16} {:<16} {:<12} {}",
                    a.id, truncate(&a.name, 30),
                    a.starts_at.format("%Y-%m-%d %H:%M"), a.ends_at.format("%Y-%m-%d %H:%M"),
                    format_recurrence(a.recurrence), dash(a.location.as_deref()));
            }
        }
    }
}

pub fn cmd_denominations(db: &mut Database, action: DenominationAction) {
    match action {
        DenominationAction::Add { name, abbreviation, city } => {
            let d = db.add_denomination(&name, abbreviation, city).unwrap_or_else(|e| fail(e.user_message()));
            println!("Added denomination {}: {}", d.id, d.name);
        }
        DenominationAction::List => {
            if db.denominations.is_empty() {
                println!("No denominations.");
                return;
            }
            for d in &db.denominations {
                println!("{:<6} {:<40} {:<8} {}", d.id, truncate(&d.name, 40),
                    dash(d.abbreviation.as_deref()), dash(d.headquarters_city.as_deref()));
            }
        }
    }
}

/// Print denomination → church → branch tree with per-church counters.
pub fn cmd_hierarchy(db: &Database) {
    let mut groups: Vec<(Option<u64>, String)> =
        db.denominations.iter().map(|d| (Some(d.id), d.name.clone())).collect();
    groups.sort_by(|a, b| a.1.to_lowercase().cmp(&b.1.to_lowercase()));
    groups.push((None, "Independent".to_string()));

    for (denomination_id, title) in groups {
        let mut churches: Vec<_> = db.churches.iter().filter(|c| c.denomination_id == denomination_id).collect();
        if churches.is_empty() {
            if denomination_id.is_some() {
                println!("{}\n  (no churches)", title);
            }
            continue;
        }
        churches.sort_by(|a, b| a.name.to_lowercase().cmp(&b.name.to_lowercase()));
        println!("{}", title);
        for (i, church) in churches.iter().enumerate() {
            let last = i + 1 == churches.len();
            let stats = db.church_statistics(church.id).unwrap_or_default();
            println!("  {} {} ({}) [{}] members: {}, visitors: {}, activities: {}",
                if last { "└─" } else { "├─" },
                church.name, church.id, format_church_status(church.status),
                stats.members_total, stats.visitors_total, stats.activities_total);
            let branches: Vec<_> = db.branches.iter().filter(|b| b.church_id == church.id).collect();
            for (j, branch) in branches.iter().enumerate() {
                println!("  {}  {} {} ({})",
                    if last { " " } else { "│" },
                    if j + 1 == branches.len() { "└─" } else { "├─" },
                    branch.name, branch.id);
            }
        }
    }
}

pub fn cmd_completions(shell: Shell) {
    use clap::CommandFactory;
    use crate::cli::Cli;

    let mut app = Cli::command();
    let app_name = app.get_name().to_string();
    generate(shell, &mut app, app_name, &mut std::io::stdout());
}

/// Resolve `--actor <email>` to a member with system access when one exists.
pub fn actor_for_email(db: &Database, email: &str, fallback: &Actor) -> Actor {
    let wanted = email.trim().to_lowercase();
    let found = db.members.iter().find(|m| {
        m.system_role.is_some()
            && (m.user_email.as_deref().map(|e| e.to_lowercase() == wanted).unwrap_or(false)
                || m.email.as_deref().map(|e| e.to_lowercase() == wanted).unwrap_or(false))
    });
    match found {
        Some(m) => Actor {
            user_id: m.user_id,
            name: m.full_name.clone(),
            email: email.trim().to_string(),
            role: m.system_role.unwrap_or(fallback.role),
        },
        None => Actor { email: email.trim().to_string(), ..fallback.clone() },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::tests::{church_payload, member_payload};

    #[test]
    fn test_actor_for_email_picks_member_role() {
        let mut db = Database::in_memory();
        let church = db.create_church(church_payload("Betel", "b@x.org")).unwrap();
        let mut payload = member_payload(church.id, "Paula");
        payload.email = Some("paula@x.org".to_string());
        let mut member = db.create_member(payload, "admin").unwrap();
        member.system_role = Some(SystemRole::Secretary);
        member.user_id = Some(7);
        db.members.retain(|m| m.id != member.id);
        db.members.push(member);

        let actor = actor_for_email(&db, "PAULA@x.org", &Actor::default());
        assert_eq!(actor.role, SystemRole::Secretary);
        assert_eq!(actor.user_id, Some(7));
        assert_eq!(actor.name, "Paula");

        let stranger = actor_for_email(&db, "nobody@x.org", &Actor::default());
        assert_eq!(stranger.role, Actor::default().role);
        assert_eq!(stranger.email, "nobody@x.org");
    }
}
