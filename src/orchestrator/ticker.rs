use super::control::{ControlService, TriggerAck};
use crate::storage::DataTaskRepository;
use chrono::Utc;
use log::{debug, info, warn};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// 定时任务触发器：周期性执行已到期的 enabled 任务
pub struct DataTaskTicker {
    control: Arc<ControlService>,
    interval: Duration,
}

impl DataTaskTicker {
    pub fn new(control: Arc<ControlService>, interval: Duration) -> Self {
        Self { control, interval }
    }

    /// 执行一轮，返回本轮启动的任务数
    pub async fn tick(&self) -> usize {
        let now = Utc::now().timestamp();
        let due = match DataTaskRepository::due_tasks(self.control.db(), now).await {
            Ok(d) => d,
            Err(e) => {
                warn!("查询到期定时任务失败: {}", e);
                return 0;
            }
        };
        let mut started = 0;
        for task in due {
            match self.control.run_task(task.id).await {
                Ok(TriggerAck::Started) => started += 1,
                Ok(TriggerAck::Busy) => debug!("定时任务 {} 仍在运行，跳过", task.task_name),
                Err(e) => warn!("定时任务 {} 启动失败: {}", task.task_name, e),
            }
        }
        started
    }

    pub fn start(self, cancel: CancellationToken) -> JoinHandle<()> {
        info!("定时任务触发器启动，间隔 {:?}", self.interval);
        tokio::spawn(async move {
            loop {
                let n = self.tick().await;
                if n > 0 {
                    info!("本轮触发 {} 个定时任务", n);
                }
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(self.interval) => {}
                }
            }
            info!("定时任务触发器已停止");
        })
    }
}
