use crate::model::{CollectionTask, Page, TaskFilter, TaskResult, TaskStatus};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

/// 采集任务表：唯一持有者，只暴露原子化的读改写操作
#[derive(Default)]
pub struct TaskStore {
    tasks: RwLock<HashMap<String, CollectionTask>>,
}

/// 各状态任务数
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct TaskCounts {
    pub pending: usize,
    pub running: usize,
    pub completed: usize,
    pub failed: usize,
}

impl TaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    // 持锁期间不会 panic，中毒时直接取回内部数据
    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, CollectionTask>> {
        self.tasks.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, CollectionTask>> {
        self.tasks.write().unwrap_or_else(|e| e.into_inner())
    }

    pub fn insert(&self, task: CollectionTask) {
        self.write().insert(task.id.clone(), task);
    }

    pub fn get(&self, id: &str) -> Option<CollectionTask> {
        self.read().get(id).cloned()
    }

    /// 按创建时间排序后分页
    pub fn list(&self, filter: &TaskFilter, page: Page) -> Vec<CollectionTask> {
        let mut out: Vec<CollectionTask> = self
            .read()
            .values()
            .filter(|t| filter.matches(t))
            .cloned()
            .collect();
        out.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.id.cmp(&b.id))
        });
        out.into_iter().skip(page.offset).take(page.limit).collect()
    }

    /// 到期的 pending 任务 id，按计划时间排序
    pub fn due_pending(&self, now: DateTime<Utc>) -> Vec<String> {
        let guard = self.read();
        let mut due: Vec<(&DateTime<Utc>, &String)> = guard
            .values()
            .filter(|t| t.status == TaskStatus::Pending && t.scheduled_at <= now)
            .map(|t| (&t.scheduled_at, &t.id))
            .collect();
        due.sort();
        due.into_iter().map(|(_, id)| id.clone()).collect()
    }

    /// pending -> running，其余状态返回 false
    pub fn try_mark_running(&self, id: &str) -> bool {
        let mut guard = self.write();
        match guard.get_mut(id) {
            Some(t) if t.status == TaskStatus::Pending => {
                t.status = TaskStatus::Running;
                t.updated_at = Utc::now();
                true
            }
            _ => false,
        }
    }

    /// running -> completed
    pub fn complete(&self, id: &str, result: TaskResult) -> bool {
        let mut guard = self.write();
        match guard.get_mut(id) {
            Some(t) if t.status == TaskStatus::Running => {
                t.status = TaskStatus::Completed;
                t.result = Some(result);
                t.error = None;
                t.updated_at = Utc::now();
                true
            }
            _ => false,
        }
    }

    /// running -> failed
    pub fn fail(&self, id: &str, error: String) -> bool {
        let mut guard = self.write();
        match guard.get_mut(id) {
            Some(t) if t.status == TaskStatus::Running => {
                t.status = TaskStatus::Failed;
                t.error = Some(error);
                t.updated_at = Utc::now();
                true
            }
            _ => false,
        }
    }

    pub fn counts(&self) -> TaskCounts {
        let mut c = TaskCounts::default();
        for t in self.read().values() {
            match t.status {
                TaskStatus::Pending => c.pending += 1,
                TaskStatus::Running => c.running += 1,
                TaskStatus::Completed => c.completed += 1,
                TaskStatus::Failed => c.failed += 1,
            }
        }
        c
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::FetchRequest;
    use chrono::Duration;

    fn task(id: &str, offset_secs: i64) -> CollectionTask {
        let now = Utc::now();
        CollectionTask {
            id: id.into(),
            task_type: "stock_basic".into(),
            collector_name: "tushare".into(),
            request: FetchRequest::StockBasic { exchange: None },
            scheduled_at: now + Duration::seconds(offset_secs),
            status: TaskStatus::Pending,
            created_at: now,
            updated_at: now,
            error: None,
            result: None,
        }
    }

    #[test]
    fn only_pending_tasks_can_start() {
        let store = TaskStore::new();
        store.insert(task("a", 0));
        assert!(store.try_mark_running("a"));
        assert!(!store.try_mark_running("a"));
        assert!(!store.try_mark_running("missing"));
        assert!(store.complete("a", TaskResult::default()));
        assert!(!store.fail("a", "late".into()));
        assert_eq!(store.get("a").unwrap().status, TaskStatus::Completed);
    }

    #[test]
    fn future_tasks_are_not_due() {
        let store = TaskStore::new();
        store.insert(task("now", -1));
        store.insert(task("later", 3600));
        assert_eq!(store.due_pending(Utc::now()), vec!["now".to_string()]);
    }

    #[test]
    fn list_filters_and_pages() {
        let store = TaskStore::new();
        for i in 0..5 {
            store.insert(task(&format!("t{}", i), 0));
        }
        store.try_mark_running("t0");
        let running = store.list(
            &TaskFilter {
                status: Some(TaskStatus::Running),
                ..Default::default()
            },
            Page::default(),
        );
        assert_eq!(running.len(), 1);
        let page = store.list(&TaskFilter::default(), Page { offset: 3, limit: 10 });
        assert_eq!(page.len(), 2);
        assert_eq!(store.counts().pending, 4);
    }
}
