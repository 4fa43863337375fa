// The process-wide growth policy switch. This lives in its own test binary
// because the switch is global: toggling it next to unrelated dictionary
// tests would leak into their growth behavior.
//
// Coverage, as one sequential scenario:
//   - with resizing disabled, tables hold at the minimum size up to 5x load
//   - beyond 5x load the forced expansion overrides the switch
//   - shrink_to_fit refuses while the switch is off and works once back on

use kvcore::dict::{self, StringKeys, INITIAL_SIZE};
use kvcore::{Dict, DictError};

#[test]
fn growth_policy_gates_expansion_until_force_ratio() {
    dict::set_resize_enabled(false);

    let mut d = Dict::with_type(StringKeys::<u64>::default());
    for i in 0..24 {
        d.insert(format!("k{i}"), i).unwrap();
    }
    // 24 entries over 4 buckets is 5x load limit territory but not past it.
    assert_eq!(d.capacity(), INITIAL_SIZE);
    assert!(!d.is_rehashing());

    // Shrinking is also policy-gated.
    assert_eq!(d.shrink_to_fit(), Err(DictError::Busy));

    // One more insert crosses the force ratio and growth proceeds anyway.
    d.insert("k24".into(), 24).unwrap();
    assert!(d.is_rehashing());
    assert!(d.capacity() > INITIAL_SIZE);
    for i in 0..25 {
        assert_eq!(d.get(&format!("k{i}")), Some(&i));
    }

    dict::set_resize_enabled(true);
    assert!(dict::resize_enabled());

    while d.is_rehashing() {
        d.rehash(64);
    }
    for i in 4..25 {
        d.remove(&format!("k{i}")).unwrap();
    }
    d.shrink_to_fit().unwrap();
    while d.is_rehashing() {
        d.rehash(64);
    }
    assert_eq!(d.capacity(), INITIAL_SIZE);
    for i in 0..4 {
        assert_eq!(d.get(&format!("k{i}")), Some(&i));
    }
}
