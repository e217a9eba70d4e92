//! Checker configuration, schedules, executions and results.
//!
//! Results are bounded per `(checker, target)` pair: [`Storage::delete_old_check_results`] keeps
//! only the most recent ones. The scheduler itself lives elsewhere; storage only records its
//! watermark.

use crate::error::Error;
use crate::identifier::Identifier;
use crate::storage::Storage;
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationSeconds};
use std::fmt;
use std::time::Duration;
use time::OffsetDateTime;

const CONFIG_PREFIX: &str = "chckrcfg-";
const RESULT_PREFIX: &str = "checkresult|";
const SCHEDULE_PREFIX: &str = "checkschedule|";
const SCHEDULE_BY_USER_PREFIX: &str = "checkschedule.user|";
const SCHEDULE_BY_TARGET_PREFIX: &str = "checkschedule.target|";
const EXECUTION_PREFIX: &str = "checkexec|";
const LASTRUN_KEY: &str = "checkscheduler.lastrun";

/// Free-form options of a checker.
pub type CheckerOptions = serde_json::Map<String, serde_json::Value>;

/// Options stored for one scope. A `None` scope field applies to everything.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckerOptionsPositional {
    pub checker: String,
    pub user: Option<Identifier>,
    pub domain: Option<Identifier>,
    pub service: Option<Identifier>,
    pub options: CheckerOptions,
}

impl CheckerOptionsPositional {
    fn specificity(&self) -> usize {
        [&self.user, &self.domain, &self.service]
            .iter()
            .filter(|s| s.is_some())
            .count()
    }
}

fn scope_part(id: Option<&Identifier>) -> String {
    id.map(Identifier::to_hex).unwrap_or_default()
}

fn config_key(
    checker: &str,
    user: Option<&Identifier>,
    domain: Option<&Identifier>,
    service: Option<&Identifier>,
) -> String {
    format!(
        "{CONFIG_PREFIX}{checker}/{}/{}/{}",
        scope_part(user),
        scope_part(domain),
        scope_part(service)
    )
}

fn parse_scope(part: &str) -> Result<Option<Identifier>, Error> {
    if part.is_empty() {
        return Ok(None);
    }
    part.parse()
        .map(Some)
        .map_err(|_| Error::Internal(format!("malformed checker scope {part}")))
}

fn parse_config_key(key: &str) -> Result<(String, Option<Identifier>, Option<Identifier>, Option<Identifier>), Error> {
    let malformed = || Error::Internal(format!("malformed checker config key {key}"));
    let rest = key.strip_prefix(CONFIG_PREFIX).ok_or_else(malformed)?;
    let mut parts = rest.rsplitn(4, '/');
    let service = parts.next().ok_or_else(malformed)?;
    let domain = parts.next().ok_or_else(malformed)?;
    let user = parts.next().ok_or_else(malformed)?;
    let checker = parts.next().ok_or_else(malformed)?;
    Ok((
        checker.to_string(),
        parse_scope(user)?,
        parse_scope(domain)?,
        parse_scope(service)?,
    ))
}

/// A stored scope matches a request when every scope field either is unset on the stored side
/// or equals the request. A request without a scope field only matches stored options without
/// it either.
fn scope_matches(stored: Option<&Identifier>, requested: Option<&Identifier>) -> bool {
    match (stored, requested) {
        (None, _) => true,
        (Some(_), None) => false,
        (Some(s), Some(r)) => s == r,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetType {
    User,
    Domain,
    Service,
}

impl fmt::Display for TargetType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TargetType::User => "user",
            TargetType::Domain => "domain",
            TargetType::Service => "service",
        })
    }
}

/// What a check runs against.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CheckTarget {
    #[serde(rename = "type")]
    pub target_type: TargetType,
    pub id: Identifier,
}

impl CheckTarget {
    fn key_part(&self) -> String {
        format!("{}|{}", self.target_type, self.id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckStatus {
    Unknown,
    Ok,
    Info,
    Warn,
    Crit,
}

/// Output of one checker run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckResult {
    #[serde(default)]
    pub id: Identifier,
    pub checker: String,
    pub target: CheckTarget,
    pub id_user: Identifier,
    #[serde(with = "time::serde::rfc3339")]
    pub executed_at: OffsetDateTime,
    pub status: CheckStatus,
    #[serde(default)]
    pub status_line: String,
    #[serde(default)]
    pub report: serde_json::Value,
}

/// When and how often a checker runs against a target.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckSchedule {
    #[serde(default)]
    pub id: Identifier,
    pub checker: String,
    pub id_user: Identifier,
    pub target: CheckTarget,
    #[serde_as(as = "DurationSeconds<u64>")]
    pub interval: Duration,
    #[serde(default = "enabled")]
    pub enabled: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub next_run: OffsetDateTime,
    #[serde(default)]
    pub options: CheckerOptions,
}

fn enabled() -> bool {
    true
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    Pending,
    Running,
    Done,
    Failed,
}

/// A checker run in flight, or just finished.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckExecution {
    #[serde(default)]
    pub id: Identifier,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schedule_id: Option<Identifier>,
    pub checker: String,
    pub target: CheckTarget,
    pub status: ExecutionStatus,
    #[serde(with = "time::serde::rfc3339")]
    pub started_at: OffsetDateTime,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub ended_at: Option<OffsetDateTime>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_id: Option<Identifier>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

fn results_prefix(checker: &str, target: &CheckTarget) -> String {
    format!("{RESULT_PREFIX}{checker}|{}|", target.key_part())
}

fn schedule_key(id: &Identifier) -> String {
    format!("{SCHEDULE_PREFIX}{id}")
}

fn schedule_user_key(schedule: &CheckSchedule) -> String {
    format!("{SCHEDULE_BY_USER_PREFIX}{}|{}", schedule.id_user, schedule.id)
}

fn schedule_target_key(schedule: &CheckSchedule) -> String {
    format!(
        "{SCHEDULE_BY_TARGET_PREFIX}{}|{}",
        schedule.target.key_part(),
        schedule.id
    )
}

fn execution_key(id: &Identifier) -> String {
    format!("{EXECUTION_PREFIX}{id}")
}

impl Storage {
    /// Store the options of `checker` for a scope.
    ///
    /// # Errors
    ///
    /// Fails if the backend does.
    pub async fn set_checker_configuration(
        &self,
        checker: &str,
        user: Option<&Identifier>,
        domain: Option<&Identifier>,
        service: Option<&Identifier>,
        options: &CheckerOptions,
    ) -> Result<(), Error> {
        self.put_json(&config_key(checker, user, domain, service), options)
            .await
    }

    /// # Errors
    ///
    /// Fails if the backend does.
    pub async fn delete_checker_configuration(
        &self,
        checker: &str,
        user: Option<&Identifier>,
        domain: Option<&Identifier>,
        service: Option<&Identifier>,
    ) -> Result<(), Error> {
        self.kv()
            .delete(&config_key(checker, user, domain, service))
            .await
    }

    /// Stored options of `checker` applying to the requested scope, least specific first.
    ///
    /// # Errors
    ///
    /// Fails if the backend does or a key doesn't follow the config layout.
    pub async fn get_checker_configuration(
        &self,
        checker: &str,
        user: Option<&Identifier>,
        domain: Option<&Identifier>,
        service: Option<&Identifier>,
    ) -> Result<Vec<CheckerOptionsPositional>, Error> {
        let mut found = Vec::new();
        for (key, options) in self
            .search_json::<CheckerOptions>(&format!("{CONFIG_PREFIX}{checker}/"))
            .await?
        {
            let (name, u, d, s) = parse_config_key(&key)?;
            if name != checker
                || !scope_matches(u.as_ref(), user)
                || !scope_matches(d.as_ref(), domain)
                || !scope_matches(s.as_ref(), service)
            {
                continue;
            }
            found.push(CheckerOptionsPositional {
                checker: name,
                user: u,
                domain: d,
                service: s,
                options,
            });
        }
        found.sort_by_key(CheckerOptionsPositional::specificity);
        Ok(found)
    }

    /// Options of `checker` for the requested scope, more specific scopes overriding broader
    /// ones.
    ///
    /// # Errors
    ///
    /// Same as [`Storage::get_checker_configuration`].
    pub async fn merged_checker_options(
        &self,
        checker: &str,
        user: Option<&Identifier>,
        domain: Option<&Identifier>,
        service: Option<&Identifier>,
    ) -> Result<CheckerOptions, Error> {
        let mut merged = CheckerOptions::new();
        for positional in self
            .get_checker_configuration(checker, user, domain, service)
            .await?
        {
            merged.extend(positional.options);
        }
        Ok(merged)
    }

    /// Store a new result, giving it a fresh identifier.
    ///
    /// # Errors
    ///
    /// Fails if the backend does.
    pub async fn create_check_result(&self, result: &mut CheckResult) -> Result<(), Error> {
        let (key, id) = self
            .kv()
            .find_identifier_key(&results_prefix(&result.checker, &result.target))
            .await?;
        result.id = id;
        self.put_json(&key, result).await
    }

    /// Results of `checker` on `target`, newest first, at most `limit` of them.
    ///
    /// # Errors
    ///
    /// Fails if the backend does.
    pub async fn list_check_results(
        &self,
        checker: &str,
        target: &CheckTarget,
        limit: Option<usize>,
    ) -> Result<Vec<CheckResult>, Error> {
        let mut results: Vec<CheckResult> = self
            .search_json::<CheckResult>(&results_prefix(checker, target))
            .await?
            .into_iter()
            .map(|(_, r)| r)
            .collect();
        results.sort_by(|a, b| b.executed_at.cmp(&a.executed_at));
        if let Some(limit) = limit {
            results.truncate(limit);
        }
        Ok(results)
    }

    /// # Errors
    ///
    /// Returns [`Error::CheckNotFound`] if there's no such result.
    pub async fn get_check_result(
        &self,
        checker: &str,
        target: &CheckTarget,
        id: &Identifier,
    ) -> Result<CheckResult, Error> {
        self.get_json(&format!("{}{id}", results_prefix(checker, target)))
            .await?
            .ok_or(Error::CheckNotFound("check result"))
    }

    /// Keep only the `keep` most recent results of `checker` on `target`; returns how many were
    /// deleted.
    ///
    /// # Errors
    ///
    /// Fails if the backend does.
    pub async fn delete_old_check_results(
        &self,
        checker: &str,
        target: &CheckTarget,
        keep: usize,
    ) -> Result<usize, Error> {
        let prefix = results_prefix(checker, target);
        let results = self.list_check_results(checker, target, None).await?;
        let mut deleted = 0;
        for old in results.iter().skip(keep) {
            self.kv().delete(&format!("{prefix}{}", old.id)).await?;
            deleted += 1;
        }
        Ok(deleted)
    }

    /// Store a schedule with its user and target index entries, giving it a fresh identifier if
    /// it has none.
    ///
    /// # Errors
    ///
    /// Fails if the backend does.
    pub async fn create_or_update_check_schedule(&self, schedule: &mut CheckSchedule) -> Result<(), Error> {
        if schedule.id.is_empty() {
            let (_, id) = self.kv().find_identifier_key(SCHEDULE_PREFIX).await?;
            schedule.id = id;
        } else if let Ok(previous) = self.get_check_schedule(&schedule.id).await {
            self.kv().delete(&schedule_user_key(&previous)).await?;
            self.kv().delete(&schedule_target_key(&previous)).await?;
        }
        self.put_json(&schedule_key(&schedule.id), schedule).await?;
        self.put_json(&schedule_user_key(schedule), &schedule.id).await?;
        self.put_json(&schedule_target_key(schedule), &schedule.id)
            .await
    }

    /// # Errors
    ///
    /// Returns [`Error::CheckNotFound`] if there's no such schedule.
    pub async fn get_check_schedule(&self, id: &Identifier) -> Result<CheckSchedule, Error> {
        self.get_json(&schedule_key(id))
            .await?
            .ok_or(Error::CheckNotFound("check schedule"))
    }

    /// # Errors
    ///
    /// Fails if the backend does.
    pub async fn list_check_schedules(&self) -> Result<Vec<CheckSchedule>, Error> {
        Ok(self
            .search_json::<CheckSchedule>(SCHEDULE_PREFIX)
            .await?
            .into_iter()
            .map(|(_, s)| s)
            .collect())
    }

    async fn schedules_from_index(&self, prefix: &str) -> Result<Vec<CheckSchedule>, Error> {
        let mut schedules = Vec::new();
        for (_, id) in self.search_json::<Identifier>(prefix).await? {
            schedules.push(self.get_check_schedule(&id).await?);
        }
        Ok(schedules)
    }

    /// # Errors
    ///
    /// Fails if the backend does or the index points at a missing schedule.
    pub async fn list_user_check_schedules(&self, user: &Identifier) -> Result<Vec<CheckSchedule>, Error> {
        self.schedules_from_index(&format!("{SCHEDULE_BY_USER_PREFIX}{user}|"))
            .await
    }

    /// # Errors
    ///
    /// Fails if the backend does or the index points at a missing schedule.
    pub async fn list_target_check_schedules(&self, target: &CheckTarget) -> Result<Vec<CheckSchedule>, Error> {
        self.schedules_from_index(&format!("{SCHEDULE_BY_TARGET_PREFIX}{}|", target.key_part()))
            .await
    }

    /// Enabled schedules due at `now`.
    ///
    /// # Errors
    ///
    /// Fails if the backend does.
    pub async fn list_due_check_schedules(&self, now: OffsetDateTime) -> Result<Vec<CheckSchedule>, Error> {
        Ok(self
            .list_check_schedules()
            .await?
            .into_iter()
            .filter(|s| s.enabled && s.next_run <= now)
            .collect())
    }

    /// # Errors
    ///
    /// Returns [`Error::CheckNotFound`] if there's no such schedule.
    pub async fn delete_check_schedule(&self, id: &Identifier) -> Result<(), Error> {
        let schedule = self.get_check_schedule(id).await?;
        self.kv().delete(&schedule_user_key(&schedule)).await?;
        self.kv().delete(&schedule_target_key(&schedule)).await?;
        self.kv().delete(&schedule_key(id)).await
    }

    /// Store an execution, giving it a fresh identifier if it has none.
    ///
    /// # Errors
    ///
    /// Fails if the backend does.
    pub async fn create_or_update_check_execution(&self, execution: &mut CheckExecution) -> Result<(), Error> {
        if execution.id.is_empty() {
            let (key, id) = self.kv().find_identifier_key(EXECUTION_PREFIX).await?;
            execution.id = id;
            return self.put_json(&key, execution).await;
        }
        self.put_json(&execution_key(&execution.id), execution).await
    }

    /// # Errors
    ///
    /// Returns [`Error::CheckNotFound`] if there's no such execution.
    pub async fn get_check_execution(&self, id: &Identifier) -> Result<CheckExecution, Error> {
        self.get_json(&execution_key(id))
            .await?
            .ok_or(Error::CheckNotFound("check execution"))
    }

    /// Executions still pending or running.
    ///
    /// # Errors
    ///
    /// Fails if the backend does.
    pub async fn list_active_check_executions(&self) -> Result<Vec<CheckExecution>, Error> {
        Ok(self
            .search_json::<CheckExecution>(EXECUTION_PREFIX)
            .await?
            .into_iter()
            .map(|(_, e)| e)
            .filter(|e| matches!(e.status, ExecutionStatus::Pending | ExecutionStatus::Running))
            .collect())
    }

    /// # Errors
    ///
    /// Fails if the backend does.
    pub async fn delete_check_execution(&self, id: &Identifier) -> Result<(), Error> {
        self.kv().delete(&execution_key(id)).await
    }

    /// When the scheduler last ran, if ever.
    ///
    /// # Errors
    ///
    /// Fails if the backend does.
    pub async fn get_scheduler_last_run(&self) -> Result<Option<OffsetDateTime>, Error> {
        Ok(self
            .get_json::<Timestamp>(LASTRUN_KEY)
            .await?
            .map(|t| t.0))
    }

    /// # Errors
    ///
    /// Fails if the backend does.
    pub async fn set_scheduler_last_run(&self, at: OffsetDateTime) -> Result<(), Error> {
        self.put_json(LASTRUN_KEY, &Timestamp(at)).await
    }
}

#[derive(Serialize, Deserialize)]
pub(crate) struct Timestamp(#[serde(with = "time::serde::rfc3339")] pub(crate) OffsetDateTime);

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use time::Duration as TimeDuration;

    fn id(b: u8) -> Identifier {
        Identifier::from_bytes(vec![b])
    }

    fn options(v: serde_json::Value) -> CheckerOptions {
        v.as_object().unwrap().clone()
    }

    #[tokio::test]
    async fn configuration_scopes_match_in_four_quadrants() {
        let storage = Storage::in_memory();
        let (u, d, s) = (id(1), id(2), id(3));
        storage
            .set_checker_configuration("ping", None, None, None, &options(json!({"count": 3, "v6": false})))
            .await
            .unwrap();
        storage
            .set_checker_configuration("ping", Some(&u), None, None, &options(json!({"count": 5})))
            .await
            .unwrap();
        storage
            .set_checker_configuration("ping", Some(&u), Some(&d), None, &options(json!({"v6": true})))
            .await
            .unwrap();
        storage
            .set_checker_configuration("ping", Some(&id(9)), None, None, &options(json!({"count": 99})))
            .await
            .unwrap();
        storage
            .set_checker_configuration("pingx", None, None, None, &options(json!({"other": 1})))
            .await
            .unwrap();

        // A request without a user only sees unscoped options.
        let global = storage
            .get_checker_configuration("ping", None, None, None)
            .await
            .unwrap();
        assert_eq!(global.len(), 1);

        let scoped = storage
            .get_checker_configuration("ping", Some(&u), Some(&d), Some(&s))
            .await
            .unwrap();
        assert_eq!(scoped.len(), 3);
        assert_eq!(scoped[0].user, None);
        assert_eq!(scoped[2].domain, Some(d.clone()));

        let merged = storage
            .merged_checker_options("ping", Some(&u), Some(&d), None)
            .await
            .unwrap();
        assert_eq!(merged, options(json!({"count": 5, "v6": true})));

        storage
            .delete_checker_configuration("ping", Some(&u), None, None)
            .await
            .unwrap();
        let merged = storage
            .merged_checker_options("ping", Some(&u), None, None)
            .await
            .unwrap();
        assert_eq!(merged["count"], 3);
    }

    #[tokio::test]
    async fn results_are_newest_first_and_bounded() {
        let storage = Storage::in_memory();
        let target = CheckTarget {
            target_type: TargetType::Domain,
            id: id(2),
        };
        let now = OffsetDateTime::now_utc();
        for age in [3, 1, 4, 2] {
            let mut result = CheckResult {
                id: Identifier::default(),
                checker: "ping".into(),
                target: target.clone(),
                id_user: id(1),
                executed_at: now - TimeDuration::minutes(age),
                status: CheckStatus::Ok,
                status_line: format!("{age} minutes ago"),
                report: serde_json::Value::Null,
            };
            storage.create_check_result(&mut result).await.unwrap();
        }

        let results = storage.list_check_results("ping", &target, None).await.unwrap();
        let lines: Vec<&str> = results.iter().map(|r| r.status_line.as_str()).collect();
        assert_eq!(
            lines,
            vec!["1 minutes ago", "2 minutes ago", "3 minutes ago", "4 minutes ago"]
        );
        assert_eq!(
            storage
                .get_check_result("ping", &target, &results[0].id)
                .await
                .unwrap(),
            results[0]
        );

        assert_eq!(storage.delete_old_check_results("ping", &target, 2).await.unwrap(), 2);
        let kept = storage.list_check_results("ping", &target, Some(5)).await.unwrap();
        assert_eq!(kept, results[..2].to_vec());
    }

    #[tokio::test]
    async fn schedules_are_indexed_by_user_and_target() {
        let storage = Storage::in_memory();
        let target = CheckTarget {
            target_type: TargetType::Domain,
            id: id(2),
        };
        let now = OffsetDateTime::now_utc();
        let mut schedule = CheckSchedule {
            id: Identifier::default(),
            checker: "ping".into(),
            id_user: id(1),
            target: target.clone(),
            interval: Duration::from_secs(3600),
            enabled: true,
            next_run: now - TimeDuration::seconds(1),
            options: CheckerOptions::new(),
        };
        storage.create_or_update_check_schedule(&mut schedule).await.unwrap();

        assert_eq!(storage.list_user_check_schedules(&id(1)).await.unwrap(), vec![schedule.clone()]);
        assert_eq!(storage.list_target_check_schedules(&target).await.unwrap().len(), 1);
        assert_eq!(storage.list_due_check_schedules(now).await.unwrap().len(), 1);

        schedule.id_user = id(5);
        storage.create_or_update_check_schedule(&mut schedule).await.unwrap();
        assert!(storage.list_user_check_schedules(&id(1)).await.unwrap().is_empty());
        assert_eq!(storage.list_check_schedules().await.unwrap().len(), 1);

        storage.delete_check_schedule(&schedule.id).await.unwrap();
        assert!(storage.list_target_check_schedules(&target).await.unwrap().is_empty());
        assert!(matches!(
            storage.get_check_schedule(&schedule.id).await,
            Err(Error::CheckNotFound(_))
        ));

        let v = serde_json::to_value(&schedule).unwrap();
        assert_eq!(v["interval"], 3600);
    }

    #[tokio::test]
    async fn executions_and_watermark() {
        let storage = Storage::in_memory();
        let mut exec = CheckExecution {
            id: Identifier::default(),
            schedule_id: None,
            checker: "ping".into(),
            target: CheckTarget {
                target_type: TargetType::Service,
                id: id(3),
            },
            status: ExecutionStatus::Running,
            started_at: OffsetDateTime::now_utc(),
            ended_at: None,
            result_id: None,
            error: None,
        };
        storage.create_or_update_check_execution(&mut exec).await.unwrap();
        assert_eq!(storage.list_active_check_executions().await.unwrap().len(), 1);
        exec.status = ExecutionStatus::Failed;
        exec.error = Some("timeout".into());
        storage.create_or_update_check_execution(&mut exec).await.unwrap();
        assert!(storage.list_active_check_executions().await.unwrap().is_empty());
        assert_eq!(storage.get_check_execution(&exec.id).await.unwrap(), exec);
        storage.delete_check_execution(&exec.id).await.unwrap();

        assert_eq!(storage.get_scheduler_last_run().await.unwrap(), None);
        let at = time::macros::datetime!(2024-05-01 12:00 UTC);
        storage.set_scheduler_last_run(at).await.unwrap();
        assert_eq!(storage.get_scheduler_last_run().await.unwrap(), Some(at));
    }
}
