// 该文件是 Menshen （门神） 项目的一部分。
// src/matcher.rs - 开集身份匹配
//
// 本文件根据 Apache 许可证第 2.0 版（以下简称“许可证”）授权使用；
// 除非遵守该许可证条款，否则您不得使用本文件。
// 您可通过以下网址获取许可证副本：
// http://www.apache.org/licenses/LICENSE-2.0
// 除非适用法律要求或书面同意，根据本许可协议分发的软件均按“原样”提供，
// 不附带任何形式的明示或暗示的保证或条件。
// 有关许可权限与限制的具体条款，请参阅本许可协议。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, Wareless Group

use crate::model::IdentityMatch;

/// 默认匹配容差
pub const DEFAULT_TOLERANCE: f32 = 0.5;

/// 最近邻开集匹配器
///
/// 距离严格小于容差才判定为已知人员，等于容差时视为陌生人。
#[derive(Debug, Clone, Copy)]
pub struct IdentityMatcher {
  tolerance: f32,
}

impl Default for IdentityMatcher {
  fn default() -> Self {
    Self::new(DEFAULT_TOLERANCE)
  }
}

impl IdentityMatcher {
  pub fn new(tolerance: f32) -> Self {
    Self { tolerance }
  }

  pub fn tolerance(&self) -> f32 {
    self.tolerance
  }

  /// 根据预先计算的距离判断身份
  ///
  /// `names[i]` 与 `distances[i]` 对应同一个图库条目。图库为空或没有可用距离时
  /// 返回 `Unknown`；最小距离相同时取第一个出现的条目。
  pub fn identify(&self, names: &[String], distances: &[f32]) -> IdentityMatch {
    let best = distances
      .iter()
      .take(names.len())
      .enumerate()
      .filter(|(_, d)| !d.is_nan())
      .fold(None::<(usize, f32)>, |best, (idx, &d)| match best {
        Some((_, min)) if d >= min => best,
        _ => Some((idx, d)),
      });

    match best {
      None => IdentityMatch::unknown(),
      Some((idx, distance)) if distance < self.tolerance => {
        IdentityMatch::known(names[idx].clone(), distance)
      }
      Some((_, distance)) => IdentityMatch::stranger(distance),
    }
  }
}
