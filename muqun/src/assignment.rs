//! 分区分派
//!
//! 纯函数：相同的成员快照与分区列表在任何实例上都得到相同的划分，
//! 各实例据此独立决策而无需相互通信。

use crate::registry::Partition;
use ahash::AHashMap;

/// 把分区划分成连续切片分派给各实例
///
/// 实例按字典序、分区按 id 升序排序后，第 k 个实例获得区间
/// `[k*P/I, (k+1)*P/I)` 内的分区，各切片大小相差至多一个。
pub fn divide_partitions(
    instances: &[String],
    partitions: &[Partition],
) -> AHashMap<String, Vec<Partition>> {
    let mut result = AHashMap::new();
    if instances.is_empty() {
        return result;
    }

    let mut instances: Vec<&String> = instances.iter().collect();
    instances.sort();
    let mut partitions: Vec<Partition> = partitions.to_vec();
    partitions.sort_by_key(|p| p.id);

    let plen = partitions.len();
    let ilen = instances.len();
    for (k, instance) in instances.into_iter().enumerate() {
        let first = k * plen / ilen;
        let last = (k + 1) * plen / ilen;
        result.insert((*instance).clone(), partitions[first..last].to_vec());
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    fn partitions(n: i32) -> Vec<Partition> {
        (0..n).map(|id| Partition { id, leader: id % 3 }).collect()
    }

    fn instances(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("instance-{i:02}")).collect()
    }

    #[test]
    fn covers_all_partitions_without_overlap() {
        for ilen in 1..=7 {
            for plen in 0..=13 {
                let members = instances(ilen);
                let divided = divide_partitions(&members, &partitions(plen));
                let mut seen: Vec<i32> = divided.values().flatten().map(|p| p.id).collect();
                seen.sort();
                assert_eq!(seen, (0..plen).collect::<Vec<_>>());
            }
        }
    }

    #[test]
    fn slice_sizes_differ_by_at_most_one() {
        for ilen in 1..=7 {
            for plen in 0..=13 {
                let members = instances(ilen);
                let divided = divide_partitions(&members, &partitions(plen));
                let sizes: Vec<usize> = divided.values().map(Vec::len).collect();
                let max = sizes.iter().max().copied().unwrap_or(0);
                let min = sizes.iter().min().copied().unwrap_or(0);
                assert!(max - min <= 1, "实例 {ilen} 分区 {plen}：{sizes:?}");
            }
        }
    }

    #[test]
    fn slices_are_contiguous_and_ordered() {
        let members = instances(3);
        let divided = divide_partitions(&members, &partitions(8));
        for slice in divided.values() {
            for pair in slice.windows(2) {
                assert_eq!(pair[1].id, pair[0].id + 1);
            }
        }
        assert_eq!(divided["instance-00"].len(), 2);
        assert_eq!(divided["instance-01"].len(), 3);
        assert_eq!(divided["instance-02"].len(), 3);
    }

    #[test]
    fn same_snapshot_converges_on_every_instance() {
        let mut members = instances(4);
        let forward = divide_partitions(&members, &partitions(10));
        members.reverse();
        let backward = divide_partitions(&members, &partitions(10));
        assert_eq!(forward, backward);
    }

    #[test]
    fn no_instances_yields_empty_map() {
        assert!(divide_partitions(&[], &partitions(4)).is_empty());
    }
}
