use std::str::FromStr;

use chrono::{DateTime, Utc};
use cron::Schedule;
use serde::{Deserialize, Serialize};

use crate::errors::{FleetError, FleetResult};

/// 任务的调度描述
///
/// 三种形态：创建即执行、固定未来时刻执行、按标准5字段CRON周期执行。
/// `cron` crate 的表达式带秒字段，这里在解析前补上秒位。
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ScheduleSpec {
    Immediate,
    At { instant: DateTime<Utc> },
    Cron { expr: String },
}

impl ScheduleSpec {
    /// 校验调度描述，CRON表达式错误在任务创建时快速失败
    pub fn validate(&self) -> FleetResult<()> {
        match self {
            ScheduleSpec::Cron { expr } => {
                Self::parse_cron(expr)?;
                Ok(())
            }
            _ => Ok(()),
        }
    }

    pub fn is_recurring(&self) -> bool {
        matches!(self, ScheduleSpec::Cron { .. })
    }

    /// 任务创建时的首次点火时间
    pub fn initial_fire(&self, now: DateTime<Utc>) -> FleetResult<Option<DateTime<Utc>>> {
        match self {
            ScheduleSpec::Immediate => Ok(Some(now)),
            ScheduleSpec::At { instant } => Ok(Some(*instant)),
            ScheduleSpec::Cron { expr } => {
                let schedule = Self::parse_cron(expr)?;
                Ok(schedule.after(&now).next())
            }
        }
    }

    /// 一个周期结束后的下次点火时间；非周期任务没有下一次
    pub fn next_fire_after(&self, after: DateTime<Utc>) -> FleetResult<Option<DateTime<Utc>>> {
        match self {
            ScheduleSpec::Cron { expr } => {
                let schedule = Self::parse_cron(expr)?;
                Ok(schedule.after(&after).next())
            }
            _ => Ok(None),
        }
    }

    fn parse_cron(expr: &str) -> FleetResult<Schedule> {
        // 标准5字段表达式，内部补秒位为0
        let with_seconds = format!("0 {expr}");
        Schedule::from_str(&with_seconds).map_err(|e| FleetError::InvalidSchedule {
            expr: expr.to_string(),
            message: e.to_string(),
        })
    }
}
