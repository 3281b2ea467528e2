#![cfg(unix)]

use std::os::unix::net::UnixStream;
use std::path::PathBuf;
use std::thread::JoinHandle;

use ciborium::Value;
use holoquilt::service::transport::RepSocket;
use holoquilt::{
    CalibrationProfile, CalibrationSource, CalibrationStatus, HoloquiltError, LiveSession,
    PipelineConfig, PixelBuffer, QuiltLayout, QuiltTexture, ServiceClient, ServiceConfig,
    SubpixelOrder,
};

fn text(s: &str) -> Value {
    Value::Text(s.to_owned())
}

fn map(entries: Vec<(&str, Value)>) -> Value {
    Value::Map(entries.into_iter().map(|(k, v)| (text(k), v)).collect())
}

fn get<'a>(v: &'a Value, key: &str) -> Option<&'a Value> {
    v.as_map()?
        .iter()
        .find(|(k, _)| k.as_text() == Some(key))
        .map(|(_, v)| v)
}

fn wrapped(x: f64) -> Value {
    map(vec![("value", Value::Float(x))])
}

fn device_reply() -> Value {
    let calibration = map(vec![
        ("pitch", wrapped(52.5)),
        // Only the normalized tilt is reported; slope has to be reconstructed.
        ("tilt", wrapped(-0.1)),
        ("center", wrapped(0.25)),
        ("invView", wrapped(1.0)),
        ("DPI", wrapped(324.0)),
        ("screenW", Value::Integer(1536.into())),
        ("screenH", Value::Integer(2048.into())),
        ("flipImageX", wrapped(0.0)),
        ("flipImageY", wrapped(0.0)),
        ("flipSubp", wrapped(1.0)),
        ("viewCone", wrapped(40.0)),
    ]);
    let default_quilt = map(vec![
        ("quiltX", Value::Integer(3360.into())),
        ("quiltY", Value::Integer(3360.into())),
        ("tileX", Value::Integer(8.into())),
        ("tileY", Value::Integer(6.into())),
    ]);
    map(vec![
        ("error", Value::Integer(0.into())),
        (
            "devices",
            Value::Array(vec![map(vec![
                ("index", Value::Integer(0.into())),
                ("hardwareVersion", text("portrait")),
                ("calibration", calibration),
                ("defaultQuilt", default_quilt),
            ])]),
        ),
    ])
}

fn empty_reply() -> Value {
    map(vec![
        ("error", Value::Integer(0.into())),
        ("devices", Value::Array(Vec::new())),
    ])
}

/// Serves one scripted reply per request and returns every request it saw.
fn fake_service(replies: Vec<Value>) -> (UnixStream, JoinHandle<Vec<Value>>) {
    let (client, server) = UnixStream::pair().unwrap();
    let handle = std::thread::spawn(move || {
        let mut rep = RepSocket::accept(Box::new(server)).unwrap();
        let mut seen = Vec::new();
        for reply in replies {
            let (id, body) = rep.recv().unwrap();
            seen.push(ciborium::de::from_reader::<Value, _>(body.as_slice()).unwrap());
            let mut out = Vec::new();
            ciborium::ser::into_writer(&reply, &mut out).unwrap();
            rep.reply(id, &out).unwrap();
        }
        seen
    });
    (client, handle)
}

fn connect(stream: UnixStream) -> ServiceClient {
    ServiceClient::with_stream(ServiceConfig::default(), Box::new(stream)).unwrap()
}

#[test]
fn info_maps_device_calibration_and_default_quilt() {
    let (stream, server) = fake_service(vec![device_reply()]);
    let client = connect(stream);

    let devices = client.info().unwrap();
    assert_eq!(devices.len(), 1);
    let d = &devices[0];
    assert_eq!(d.hardware_version.as_deref(), Some("portrait"));
    assert_eq!(d.view_cone_degrees, Some(40.0));

    let c = &d.calibration;
    assert_eq!(c.pitch, 52.5);
    assert_eq!((c.screen_width, c.screen_height), (1536, 2048));
    assert_eq!(c.subpixel_order, SubpixelOrder::Flipped);
    assert!((c.effective_tilt() - -0.1).abs() < 1e-12);

    let q = d.default_quilt.unwrap();
    assert_eq!((q.columns, q.rows), (8, 6));
    assert_eq!((q.view_width, q.view_height), (420, 560));

    let seen = server.join().unwrap();
    let cmd = get(&seen[0], "cmd").unwrap();
    assert!(get(cmd, "info").is_some());
    assert_eq!(get(&seen[0], "bin"), Some(&Value::Bytes(Vec::new())));
}

#[test]
fn zero_devices_keeps_previous_calibration() {
    let (stream, server) = fake_service(vec![empty_reply()]);
    let client = connect(stream);

    let cfg = PipelineConfig {
        calibration: CalibrationSource::Service,
        ..PipelineConfig::default()
    };
    let mut session = LiveSession::new(cfg).unwrap();
    let status = session.refresh_calibration(Some(&client)).unwrap();
    assert_eq!(status, CalibrationStatus::NoDevices);
    assert_eq!(session.calibration(), &CalibrationProfile::default());
    server.join().unwrap();
}

#[test]
fn device_refresh_adopts_default_quilt() {
    let (stream, server) = fake_service(vec![device_reply()]);
    let client = connect(stream);

    let cfg = PipelineConfig {
        calibration: CalibrationSource::Service,
        ..PipelineConfig::default()
    };
    let mut session = LiveSession::new(cfg).unwrap();
    assert_eq!(
        session.refresh_calibration(Some(&client)).unwrap(),
        CalibrationStatus::Updated
    );
    assert_eq!(session.layout().total_views(), 48);
    assert_eq!(session.calibration().center, 0.25);
    server.join().unwrap();
}

#[test]
fn show_sends_png_quilt_with_settings() {
    let (stream, server) = fake_service(vec![map(vec![("error", Value::Integer(0.into()))])]);
    let client = connect(stream);

    let layout = QuiltLayout::tight(2, 2, 3, 2).unwrap();
    let mut quilt = QuiltTexture::new(layout).unwrap();
    // Bottom-left tile red: it must end up in the bottom rows of the encoded image.
    quilt
        .blit_view(0, &PixelBuffer::filled(3, 2, [255, 0, 0, 255]).unwrap())
        .unwrap();
    client.show_quilt(&quilt, 0.75).unwrap();

    let seen = server.join().unwrap();
    let show = get(get(&seen[0], "cmd").unwrap(), "show").unwrap();
    assert_eq!(get(show, "source"), Some(&text("bindata")));
    let settings = get(get(show, "quilt").unwrap(), "settings").unwrap();
    assert_eq!(get(settings, "vtotal"), Some(&Value::Integer(4.into())));
    assert_eq!(get(settings, "aspect"), Some(&Value::Float(0.75)));

    let Some(Value::Bytes(png)) = get(&seen[0], "bin") else {
        panic!("bin is not a byte string");
    };
    let img = image::load_from_memory(png).unwrap().to_rgba8();
    assert_eq!(img.dimensions(), (6, 4));
    assert_eq!(img.get_pixel(0, 3).0, [255, 0, 0, 255]);
    assert_eq!(img.get_pixel(0, 0).0, [0, 0, 0, 255]);
}

#[test]
fn error_codes_become_service_errors() {
    let (stream, server) = fake_service(vec![map(vec![("error", Value::Integer(2.into()))])]);
    let client = connect(stream);
    let err = client.wipe().unwrap_err();
    assert!(matches!(err, HoloquiltError::Service(_)));
    assert!(client.is_connected());
    server.join().unwrap();
}

#[test]
fn unreachable_service_degrades_instead_of_failing() {
    let cfg = PipelineConfig {
        calibration: CalibrationSource::Service,
        service: ServiceConfig {
            socket_path: PathBuf::from("target/service_tests/no-such-driver.ipc"),
            timeout_ms: 200,
        },
        ..PipelineConfig::default()
    };
    let client = ServiceClient::new(cfg.service.clone());
    assert!(client.connect().unwrap_err().is_recoverable());

    let mut session = LiveSession::new(cfg).unwrap();
    let status = session.refresh_calibration(Some(&client)).unwrap();
    assert!(matches!(status, CalibrationStatus::KeptPrevious(_)));
    assert_eq!(session.calibration(), &CalibrationProfile::default());
    assert!(!client.is_connected());
}

fn service_session() -> LiveSession {
    let cfg = PipelineConfig {
        calibration: CalibrationSource::Service,
        ..PipelineConfig::default()
    };
    let mut session = LiveSession::new(cfg).unwrap();
    session
        .set_calibration(CalibrationProfile {
            center: 0.5,
            ..CalibrationProfile::default()
        })
        .unwrap();
    session
}

#[test]
fn malformed_device_list_keeps_previous_calibration() {
    let reply = map(vec![
        ("error", Value::Integer(0.into())),
        ("devices", text("garbage")),
    ]);
    let (stream, server) = fake_service(vec![reply]);
    let client = connect(stream);

    let mut session = service_session();
    let before = session.calibration().clone();
    let status = session.refresh_calibration(Some(&client)).unwrap();
    assert!(matches!(status, CalibrationStatus::KeptPrevious(_)));
    assert_eq!(session.calibration(), &before);
    server.join().unwrap();
}

#[test]
fn unusable_device_calibration_keeps_previous_calibration() {
    let mut reply = device_reply();
    // Zero out screenW of the first device.
    if let Value::Map(top) = &mut reply
        && let Some((_, Value::Array(devices))) =
            top.iter_mut().find(|(k, _)| k.as_text() == Some("devices"))
        && let Some(Value::Map(device)) = devices.first_mut()
        && let Some((_, Value::Map(cal))) =
            device.iter_mut().find(|(k, _)| k.as_text() == Some("calibration"))
        && let Some((_, w)) = cal.iter_mut().find(|(k, _)| k.as_text() == Some("screenW"))
    {
        *w = Value::Integer(0.into());
    } else {
        panic!("device reply lost its screenW");
    }
    let (stream, server) = fake_service(vec![reply]);
    let client = connect(stream);

    let mut session = service_session();
    let before = session.calibration().clone();
    let layout = *session.layout();
    match session.refresh_calibration(Some(&client)).unwrap() {
        CalibrationStatus::KeptPrevious(reason) => assert!(reason.contains("screenW"), "{reason}"),
        other => panic!("unexpected status {other:?}"),
    }
    assert_eq!(session.calibration(), &before);
    assert_eq!(session.layout(), &layout);
    server.join().unwrap();
}
