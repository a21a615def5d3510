//! The shared cache fixture driven through a short realistic session.

use parlor_cache_testkit::fixtures::{user, CacheFixture};

#[test]
fn test_fixture_pages_fill_one_window() {
    let fx = CacheFixture::new("olga");
    let window = fx.open_newest();

    fx.load_page(&window, 50, 41, true);
    fx.load_page(&window, 40, 31, false);

    let chunk = window.current().unwrap();
    assert_eq!(chunk.ids, (31..=50).rev().collect::<Vec<_>>());
    assert!(chunk.newest_reached);
    assert!(fx.cache.message(&fx.peer, 37).is_some());
}

#[test]
fn test_fixture_anchored_window_attaches_when_covered() {
    let fx = CacheFixture::new("olga");
    let scroller = fx.open_newest();
    let jump = fx.open_at(45);

    fx.load_page(&scroller, 50, 41, true);
    assert!(jump.is_attached());
    assert_eq!(
        jump.current().unwrap().ids,
        (41..=50).rev().collect::<Vec<_>>()
    );
}

#[test]
fn test_fixture_records_pass_the_min_filter() {
    let fx = CacheFixture::new("olga");
    fx.cache.users().put(user(9, "Olga"));

    assert_eq!(fx.cache.user(9).unwrap().username.as_deref(), Some("olga"));
    assert_eq!(fx.cache.chat_list().len(), 1);
}
