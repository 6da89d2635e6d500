//! Shared fixtures for unit, scenario and property tests.

use std::path::PathBuf;

use sqlx::SqlitePool;

use crate::contributions::contribute;
use crate::db::{init_pool, memory_pool};
use crate::ledger;
use crate::projects::{self, create_project, NewMilestone, NewProject};
use crate::types::{
    Actor, Amount, MilestoneProof, MilestoneType, Owner, Project, ProjectStatus, Role,
    SpendingRule, UserId,
};
use crate::wallets::{add_funds, open_wallet};

/// Fixed clock for every fixture.
pub const NOW: i64 = 1_750_000_000;
pub const CREATOR_ID: UserId = 500;
pub const ADMIN_ID: UserId = 1_000;
const DAY: i64 = 24 * 60 * 60;

pub fn admin() -> Actor {
    Actor::new(ADMIN_ID, Role::Admin)
}

pub fn creator() -> Actor {
    Actor::new(CREATOR_ID, Role::Creator)
}

pub fn contributor(id: UserId) -> Actor {
    Actor::new(id, Role::Contributor)
}

/// Kickoff 20%, production 30%, release 20%; stake 10%; 30 day campaign.
pub fn new_project(goal: Amount) -> NewProject {
    NewProject {
        title: "Short film".to_string(),
        funding_goal: goal,
        creator_stake: 10,
        deadline: NOW + 30 * DAY,
        milestones: vec![
            NewMilestone {
                title: "Kickoff".to_string(),
                milestone_type: MilestoneType::Kickoff,
                tranche_percent: 20,
            },
            NewMilestone {
                title: "Principal photography".to_string(),
                milestone_type: MilestoneType::Production,
                tranche_percent: 30,
            },
            NewMilestone {
                title: "Premiere".to_string(),
                milestone_type: MilestoneType::Release,
                tranche_percent: 20,
            },
        ],
        spending_rules: vec![],
    }
}

pub fn kickoff_proof() -> MilestoneProof {
    MilestoneProof {
        text: Some("Crew hired, shooting schedule locked".to_string()),
        ..Default::default()
    }
}

pub fn production_proof() -> MilestoneProof {
    MilestoneProof {
        media_urls: vec!["https://media.example/day1.mp4".to_string()],
        ..Default::default()
    }
}

async fn funded(pool: &SqlitePool, actor: Actor, amount: Amount) -> Actor {
    open_wallet(pool, &actor).await.unwrap();
    if amount > 0 {
        add_funds(pool, &actor, amount).await.unwrap();
    }
    actor
}

/// A contributor with an open wallet holding `amount`.
pub async fn funded_user(pool: &SqlitePool, id: UserId, amount: Amount) -> Actor {
    funded(pool, contributor(id), amount).await
}

/// Give the fixture creator a wallet holding `amount`.
pub async fn fund_creator(pool: &SqlitePool, amount: Amount) -> Actor {
    funded(pool, creator(), amount).await
}

/// A database file under the temp dir, removed with its WAL files on drop.
pub struct TempDatabase {
    path: PathBuf,
}

impl Drop for TempDatabase {
    fn drop(&mut self) {
        for suffix in ["", "-wal", "-shm"] {
            let mut file = self.path.clone().into_os_string();
            file.push(suffix);
            let _ = std::fs::remove_file(file);
        }
    }
}

/// A migrated WAL database file behind a pool of `connections`.
pub async fn file_pool(connections: u32) -> (SqlitePool, TempDatabase) {
    let path = std::env::temp_dir().join(format!("escrow-{}.db", uuid::Uuid::new_v4()));
    let pool = init_pool(path.to_str().unwrap(), connections).await.unwrap();
    (pool, TempDatabase { path })
}

pub async fn balance_of(pool: &SqlitePool, owner: Owner) -> Amount {
    let mut conn = pool.acquire().await.unwrap();
    ledger::find_by_owner(&mut conn, owner)
        .await
        .unwrap()
        .map_or(0, |wallet| wallet.balance)
}

async fn create_in(
    pool: &SqlitePool,
    status: ProjectStatus,
    new: NewProject,
) -> Project {
    let project = create_project(pool, &creator(), new, NOW).await.unwrap();
    if status != ProjectStatus::Draft {
        projects::update_project_status(pool, &admin(), project.id, status)
            .await
            .unwrap();
    }
    projects::get_project(pool, project.id).await.unwrap()
}

/// A fixture project moved to `status` by an admin.
pub async fn project_in(pool: &SqlitePool, status: ProjectStatus, goal: Amount) -> Project {
    create_in(pool, status, new_project(goal)).await
}

pub async fn project_with_rules(
    status: ProjectStatus,
    rules: Vec<SpendingRule>,
) -> (SqlitePool, Project) {
    let pool = memory_pool().await.unwrap();
    let new = NewProject {
        spending_rules: rules,
        ..new_project(100_000)
    };
    let project = create_in(&pool, status, new).await;
    (pool, project)
}

/// An ACTIVE 100_000 project where each `(user, amount)` pair has contributed.
///
/// Backers spend their whole wallet, and the creator has no wallet yet.
pub async fn backed_project(backers: &[(UserId, Amount)]) -> (SqlitePool, Project) {
    let pool = memory_pool().await.unwrap();
    let project = project_in(&pool, ProjectStatus::Active, 100_000).await;
    for &(user_id, amount) in backers {
        let backer = funded_user(&pool, user_id, amount).await;
        contribute(&pool, &backer, project.id, amount, "INR")
            .await
            .unwrap();
    }
    let project = projects::get_project(&pool, project.id).await.unwrap();
    (pool, project)
}
