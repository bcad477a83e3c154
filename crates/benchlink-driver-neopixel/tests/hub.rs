//! RGBW hub and pixel exchanges against the mock serial harness.

use benchlink_core::codec::Value;
use benchlink_core::device::{Device, Hub};
use benchlink_core::error::{ExecError, ParameterError, ProtocolError};
use benchlink_core::mock_serial::{self, MockDeviceHarness};
use benchlink_driver_neopixel::{RgbwHub, BRIGHTNESS, PIXEL_INDEX, PIXEL_NUMBER};
use std::time::Duration;

fn hub() -> (RgbwHub, MockDeviceHarness) {
    let (connector, harness) = mock_serial::connector();
    let mut hub = RgbwHub::new(Box::new(connector))
        .with_boot_delay(Duration::ZERO)
        .with_answer_timeout(Duration::from_millis(150));
    hub.set_port("/dev/ttyACM0").unwrap();
    (hub, harness)
}

async fn initialized(pixels: u32) -> (RgbwHub, MockDeviceHarness) {
    let (mut hub, mut harness) = hub();
    let reply = format!("{}\n", pixels);
    let (res, _) = tokio::join!(
        hub.initialize(),
        harness.expect_and_respond(b"0N?\n", reply.as_bytes())
    );
    res.unwrap();
    (hub, harness)
}

#[tokio::test]
async fn initialize_discovers_pixels() {
    let (mut hub, _harness) = initialized(3).await;

    assert_eq!(hub.pixel_count(), 3);
    assert_eq!(hub.model().cached(PIXEL_NUMBER), Some(Value::Int(3)));

    let pixel = hub.pixel(2).unwrap();
    assert_eq!(pixel.name(), "RGBW2");
    assert_eq!(pixel.description(), "single Neopixel RGBW LED from the strip Hub");
    assert_eq!(pixel.cached(PIXEL_INDEX), Some(Value::Int(2)));
    assert!(hub.pixel(3).is_none());

    let names: Vec<_> = {
        let hub = hub.as_hub().unwrap();
        (0..hub.child_count()).filter_map(|i| hub.child_name(i)).collect()
    };
    assert_eq!(names, vec!["RGBW0", "RGBW1", "RGBW2"]);
}

#[tokio::test]
async fn initialize_fails_on_unreadable_count() {
    let (mut hub, mut harness) = hub();

    let (res, _) = tokio::join!(
        hub.initialize(),
        harness.expect_and_respond(b"0N?\n", b"many\n")
    );
    assert!(res.is_err());
    assert!(!hub.model().is_initialized());
    assert_eq!(hub.pixel_count(), 0);
}

#[tokio::test]
async fn initialize_is_idempotent() {
    let (mut hub, mut harness) = initialized(1).await;
    hub.initialize().await.unwrap();
    harness.expect_silence(Duration::from_millis(20)).await;
}

#[tokio::test]
async fn brightness_caches_the_applied_value() {
    let (mut hub, mut harness) = initialized(1).await;

    let (res, _) = tokio::join!(
        hub.set_property(BRIGHTNESS, Value::Int(200)),
        harness.expect_and_respond(b"0L200\n", b"180\n")
    );
    assert_eq!(res.unwrap(), Value::Int(180));
    assert_eq!(hub.model().cached(BRIGHTNESS), Some(Value::Int(180)));

    let (res, _) = tokio::join!(
        hub.get_property(BRIGHTNESS),
        harness.expect_and_respond(b"0L?\n", b"180\n")
    );
    assert_eq!(res.unwrap(), Value::Int(180));
}

#[tokio::test]
async fn brightness_query_timeout_keeps_cache() {
    let (mut hub, mut harness) = initialized(1).await;

    let (res, _) = tokio::join!(
        hub.set_property(BRIGHTNESS, Value::Int(40)),
        harness.expect_and_respond(b"0L40\n", b"40\n")
    );
    res.unwrap();

    let (res, _) = tokio::join!(hub.get_property(BRIGHTNESS), harness.expect_write(b"0L?\n"));
    assert!(matches!(
        res,
        Err(ParameterError::Exec(ExecError::TransportTimeout { .. }))
    ));
    assert_eq!(hub.model().cached(BRIGHTNESS), Some(Value::Int(40)));
}

#[tokio::test]
async fn brightness_out_of_range_sends_nothing() {
    let (mut hub, mut harness) = initialized(1).await;

    let err = hub
        .set_property(BRIGHTNESS, Value::Int(256))
        .await
        .unwrap_err();
    assert!(matches!(err, ParameterError::OutOfRange { .. }));
    harness.expect_silence(Duration::from_millis(20)).await;
}

#[tokio::test]
async fn pixel_number_is_read_only() {
    let (mut hub, _harness) = initialized(4).await;

    let err = hub
        .set_property(PIXEL_NUMBER, Value::Int(8))
        .await
        .unwrap_err();
    assert!(matches!(err, ParameterError::Immutable(_)));
}

#[tokio::test]
async fn pixel_channels_go_through_the_hub_link() {
    let (mut hub, mut harness) = initialized(4).await;
    let mut pixel = hub.pixel(3).unwrap();

    let (res, _) = tokio::join!(
        pixel.set("R", Value::Int(128)),
        harness.expect_and_respond(b"3R128\n", b"128\n")
    );
    assert_eq!(res.unwrap(), Value::Int(128));

    let (res, _) = tokio::join!(
        pixel.get("W"),
        harness.expect_and_respond(b"3W?\n", b"50\n")
    );
    assert_eq!(res.unwrap(), Value::Int(50));
    assert_eq!(pixel.cached("W"), Some(Value::Int(50)));
}

#[tokio::test]
async fn pixel_set_rgbw_writes_each_channel() {
    let (mut hub, mut harness) = initialized(2).await;
    let mut pixel = hub.pixel(1).unwrap();

    let (res, _) = tokio::join!(pixel.set_rgbw([255, 10, 0, 32]), async {
        harness.expect_and_respond(b"1R255\n", b"255\n").await;
        harness.expect_and_respond(b"1G10\n", b"10\n").await;
        harness.expect_and_respond(b"1B0\n", b"0\n").await;
        harness.expect_and_respond(b"1W32\n", b"32\n").await;
    });
    res.unwrap();
    assert_eq!(pixel.cached("G"), Some(Value::Int(10)));
}

#[tokio::test]
async fn pixel_error_reply_maps_to_device_error() {
    let (mut hub, mut harness) = initialized(2).await;

    let (res, _) = {
        let hub = hub.as_hub().unwrap();
        tokio::join!(
            hub.set_child_property(0, "B", Value::Int(99)),
            harness.expect_and_respond(b"0B99\n", b"Err: pixel busy\n")
        )
    };
    assert!(matches!(
        res.unwrap_err().protocol(),
        Some(ProtocolError::DeviceReportedError(m)) if m == "pixel busy"
    ));
    assert_eq!(hub.pixel(0).unwrap().cached("B"), Some(Value::Int(0)));
}

#[tokio::test]
async fn unknown_child_is_reported() {
    let (mut hub, _harness) = initialized(2).await;
    let hub = hub.as_hub().unwrap();

    let err = hub.get_child_property(5, "R").await.unwrap_err();
    assert!(matches!(err, ParameterError::Unknown(ref name) if name == "RGBW5"));
}
