use std::collections::{BTreeMap, HashMap, HashSet};

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::domain::entity::mapping::SearchCriteria;
use crate::domain::entity::mapping_run::RunCounts;
use crate::domain::entity::profile::{DiscoveredRecord, Profile};

/// ProfileDiff は 1 回のランで保存済みプロフィールに適用する変更と集計。
#[derive(Debug, Clone, Default)]
pub struct ProfileDiff {
    /// 新規挿入・更新・離脱マークを含む、書き戻しが必要なプロフィール。
    pub changed: Vec<Profile>,
    pub counts: RunCounts,
}

/// ProfileDiffService は発見結果と保存済みプロフィールの差分を外部 ID で突合して求める。
///
/// 同一ラン内で同じ外部 ID が複数回観測された場合は後の観測値を採用する。
/// 出力は外部 ID 順で決定的になる。
pub struct ProfileDiffService;

impl ProfileDiffService {
    /// compute は差分を計算する。
    ///
    /// - 今回あり・前回なし（または離脱済み）: new_profiles
    /// - 両方にあり役職/会社が変化: job_changes
    /// - 前回あり・今回なし: 現在の条件にまだ一致する場合のみ departures。
    ///   条件に一致しなくなったものは差分から除外し、そのまま残す。
    /// - unverified（詳細取得に失敗した候補）は離脱扱いにも更新対象にもしない。
    pub fn compute(
        mapping_id: Uuid,
        criteria: &SearchCriteria,
        existing: &[Profile],
        discovered: Vec<DiscoveredRecord>,
        unverified: &HashSet<String>,
        observed_at: DateTime<Utc>,
    ) -> ProfileDiff {
        let mut latest: BTreeMap<String, DiscoveredRecord> = BTreeMap::new();
        for record in discovered {
            let record = record.normalized();
            if record.external_id.is_empty() {
                continue;
            }
            latest.insert(record.external_id.clone(), record);
        }

        let by_external_id: HashMap<&str, &Profile> = existing
            .iter()
            .map(|p| (p.external_id.as_str(), p))
            .collect();

        let mut diff = ProfileDiff::default();
        diff.counts.total_found = u32::try_from(latest.len()).unwrap_or(u32::MAX);

        for (external_id, record) in &latest {
            match by_external_id.get(external_id.as_str()) {
                None => {
                    diff.counts.new_profiles += 1;
                    diff.changed
                        .push(Profile::from_record(mapping_id, record.clone(), observed_at));
                }
                Some(prior) => {
                    let mut updated = (*prior).clone();
                    if !prior.is_active() {
                        diff.counts.new_profiles += 1;
                    } else if prior.has_job_change(record) {
                        diff.counts.job_changes += 1;
                    }
                    updated.observe(record.clone(), observed_at);
                    diff.changed.push(updated);
                }
            }
        }

        let mut departed: Vec<&Profile> = existing
            .iter()
            .filter(|p| p.is_active())
            .filter(|p| !latest.contains_key(&p.external_id))
            .filter(|p| !unverified.contains(&p.external_id))
            .filter(|p| criteria.matches(p))
            .collect();
        departed.sort_by(|a, b| a.external_id.cmp(&b.external_id));
        for prior in departed {
            let mut gone = prior.clone();
            gone.mark_departed(observed_at);
            diff.counts.departures += 1;
            diff.changed.push(gone);
        }

        diff
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: &str, title: &str) -> DiscoveredRecord {
        DiscoveredRecord {
            external_id: id.into(),
            name: format!("Person {id}"),
            job_title: Some(title.into()),
            company: Some("Acme".into()),
            location: Some("Berlin, Germany".into()),
            profile_url: Some(format!("https://www.linkedin.com/in/{id}")),
            image_url: None,
        }
    }

    fn stored(mapping_id: Uuid, id: &str, title: &str, at: DateTime<Utc>) -> Profile {
        Profile::from_record(mapping_id, record(id, title), at)
    }

    #[test]
    fn test_diff_new_departed_and_changed() {
        let mapping_id = Uuid::new_v4();
        let before = Utc::now() - chrono::Duration::days(1);
        let now = Utc::now();
        let existing = vec![
            stored(mapping_id, "A", "Engineer", before),
            stored(mapping_id, "B", "Engineer", before),
            stored(mapping_id, "C", "Engineer", before),
        ];
        let discovered = vec![
            record("B", "Engineering Manager"),
            record("C", "Engineer"),
            record("D", "Engineer"),
        ];

        let diff = ProfileDiffService::compute(
            mapping_id,
            &SearchCriteria::default(),
            &existing,
            discovered,
            &HashSet::new(),
            now,
        );

        assert_eq!(diff.counts.total_found, 3);
        assert_eq!(diff.counts.new_profiles, 1);
        assert_eq!(diff.counts.departures, 1);
        assert_eq!(diff.counts.job_changes, 1);

        let a = diff.changed.iter().find(|p| p.external_id == "A").unwrap();
        assert_eq!(a.departed_at, Some(now));
        assert_eq!(a.last_seen_at, before);
        let b = diff.changed.iter().find(|p| p.external_id == "B").unwrap();
        assert_eq!(b.job_title.as_deref(), Some("Engineering Manager"));
        assert_eq!(b.last_seen_at, now);
    }

    #[test]
    fn test_later_observation_wins_within_run() {
        let mapping_id = Uuid::new_v4();
        let existing = vec![stored(mapping_id, "A", "Engineer", Utc::now())];
        let discovered = vec![record("A", "CTO"), record("A", "Engineer")];

        let diff = ProfileDiffService::compute(
            mapping_id,
            &SearchCriteria::default(),
            &existing,
            discovered,
            &HashSet::new(),
            Utc::now(),
        );

        assert_eq!(diff.counts.total_found, 1);
        assert_eq!(diff.counts.job_changes, 0);
    }

    #[test]
    fn test_narrowed_criteria_are_not_departures() {
        let mapping_id = Uuid::new_v4();
        let at = Utc::now();
        let mut outside = stored(mapping_id, "A", "Designer", at);
        outside.company = Some("Other Corp".into());
        let existing = vec![outside, stored(mapping_id, "B", "Engineer", at)];
        let criteria = SearchCriteria {
            job_title: Some("engineer".into()),
            company: None,
            country: None,
        };

        let diff = ProfileDiffService::compute(
            mapping_id,
            &criteria,
            &existing,
            vec![],
            &HashSet::new(),
            at,
        );

        assert_eq!(diff.counts.departures, 1);
        assert!(diff.changed.iter().all(|p| p.external_id == "B"));
    }

    #[test]
    fn test_unverified_candidates_are_untouched() {
        let mapping_id = Uuid::new_v4();
        let at = Utc::now();
        let existing = vec![stored(mapping_id, "A", "Engineer", at)];
        let unverified: HashSet<String> = ["A".to_string()].into_iter().collect();

        let diff = ProfileDiffService::compute(
            mapping_id,
            &SearchCriteria::default(),
            &existing,
            vec![],
            &unverified,
            at,
        );

        assert_eq!(diff.counts.departures, 0);
        assert!(diff.changed.is_empty());
    }

    #[test]
    fn test_rediscovered_departure_counts_as_new() {
        let mapping_id = Uuid::new_v4();
        let at = Utc::now();
        let mut gone = stored(mapping_id, "A", "Engineer", at);
        gone.mark_departed(at);

        let diff = ProfileDiffService::compute(
            mapping_id,
            &SearchCriteria::default(),
            &[gone],
            vec![record("A", "Engineer")],
            &HashSet::new(),
            at,
        );

        assert_eq!(diff.counts.new_profiles, 1);
        assert!(diff.changed[0].is_active());
    }
}
