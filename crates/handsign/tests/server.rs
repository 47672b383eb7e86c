use std::io::{Cursor, Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::thread;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use image::{DynamicImage, ImageOutputFormat, Rgb, RgbImage};
use serde_json::{json, Value};

use handsign::classifier::Classifier;
use handsign::hand::{Hand, HandDetector};
use handsign::labels::ClassNames;
use handsign::recognizer::{Options, Recognizer};
use handsign::sequence::Sequence;
use handsign::server::Server;
use handsign::{NUM_LANDMARKS, PREPROCESSING_VERSION, SEQ_LEN, WARMUP_FRAMES};

/// Sees a hand whenever the top-left pixel is red.
struct RedHand;

impl HandDetector for RedHand {
    fn detect(&self, image: &RgbImage) -> anyhow::Result<Vec<Hand>> {
        if image.get_pixel(0, 0).0[0] < 128 {
            return Ok(Vec::new());
        }
        let mut landmarks = [[0.0; 3]; NUM_LANDMARKS];
        for (i, lm) in landmarks.iter_mut().enumerate() {
            *lm = [0.3 + i as f32 * 0.01, 0.4 + i as f32 * 0.02, 0.0];
        }
        Ok(vec![Hand::new(landmarks)])
    }
}

struct Constant;

impl Classifier for Constant {
    fn logits(&self, _: &Sequence) -> anyhow::Result<Vec<f32>> {
        Ok(vec![0.5, 3.0, 1.0, -2.0])
    }

    fn num_classes(&self) -> usize {
        4
    }
}

fn start() -> SocketAddr {
    start_with(|server| server)
}

fn start_with(configure: impl FnOnce(Server) -> Server) -> SocketAddr {
    let classes = ClassNames::from_json(r#"["drink", "eat", "hello", "thanks"]"#).unwrap();
    let recognizer = Recognizer::new(
        Box::new(RedHand),
        Box::new(Constant),
        classes,
        Options::default(),
    )
    .unwrap();
    let server = configure(Server::bind("127.0.0.1:0", recognizer, 1024 * 1024).unwrap());
    let addr = server.local_addr().unwrap();
    thread::spawn(move || server.run().unwrap());
    addr
}

fn image_payload(color: [u8; 3]) -> String {
    let image = RgbImage::from_pixel(16, 16, Rgb(color));
    let mut png = Vec::new();
    DynamicImage::ImageRgb8(image)
        .write_to(&mut Cursor::new(&mut png), ImageOutputFormat::Png)
        .unwrap();
    format!("data:image/png;base64,{}", STANDARD.encode(png))
}

/// Sends a raw request and returns the status code and the parsed JSON body (`Null` if empty).
fn request(addr: SocketAddr, raw: &[u8]) -> (u16, String, Value) {
    let mut stream = TcpStream::connect(addr).unwrap();
    stream.write_all(raw).unwrap();
    let mut response = String::new();
    stream.read_to_string(&mut response).unwrap();

    let (head, body) = response.split_once("\r\n\r\n").unwrap();
    let status = head.split(' ').nth(1).unwrap().parse().unwrap();
    let body = if body.is_empty() {
        Value::Null
    } else {
        serde_json::from_str(body).unwrap()
    };
    (status, head.to_string(), body)
}

fn get(addr: SocketAddr, path: &str) -> (u16, Value) {
    let (status, _, body) = request(
        addr,
        format!("GET {path} HTTP/1.1\r\nHost: localhost\r\n\r\n").as_bytes(),
    );
    (status, body)
}

fn post(addr: SocketAddr, path: &str, body: &Value, session: Option<&str>) -> (u16, Value) {
    let body = body.to_string();
    let session = session
        .map(|id| format!("X-Session-Id: {id}\r\n"))
        .unwrap_or_default();
    let raw = format!(
        "POST {path} HTTP/1.1\r\nHost: localhost\r\nContent-Type: application/json\r\n\
         {session}Content-Length: {}\r\n\r\n{body}",
        body.len()
    );
    let (status, _, body) = request(addr, raw.as_bytes());
    (status, body)
}

#[test]
fn health_and_classes() {
    let addr = start();

    let (status, body) = get(addr, "/api/health");
    assert_eq!(status, 200);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["model_loaded"], true);
    assert_eq!(body["preprocessing_version"], PREPROCESSING_VERSION);
    assert_eq!(body["classes"].as_array().unwrap().len(), 4);

    let (status, body) = get(addr, "/api/classes");
    assert_eq!(status, 200);
    assert_eq!(body["classes"], json!(["drink", "eat", "hello", "thanks"]));
}

#[test]
fn frames_without_hands_never_predict() {
    let addr = start();
    let blank = json!({ "image": image_payload([0, 0, 0]) });

    for _ in 0..25 {
        let (status, body) = post(addr, "/api/predict", &blank, Some("blank"));
        assert_eq!(status, 200);
        assert_eq!(
            body,
            json!({ "success": false, "message": "No hands detected", "confidence": 0.0 })
        );
    }
}

#[test]
fn collects_then_predicts_then_resets() {
    let addr = start();
    let hand = json!({ "image": image_payload([255, 0, 0]), "session": "s1" });

    for i in 1..WARMUP_FRAMES {
        let (status, body) = post(addr, "/api/predict", &hand, None);
        assert_eq!(status, 200);
        assert_eq!(body["success"], false);
        assert_eq!(
            body["message"],
            format!("Collecting frames... ({i}/{SEQ_LEN})")
        );
        assert_eq!(body["buffer_size"], i);
    }

    let (status, body) = post(addr, "/api/predict", &hand, None);
    assert_eq!(status, 200);
    assert_eq!(body["success"], true);
    assert_eq!(body["prediction"], "eat");
    assert_eq!(body["buffer_size"], WARMUP_FRAMES);
    let top = body["top_predictions"].as_array().unwrap();
    assert_eq!(top.len(), 3);
    assert_eq!(top[0]["class"], "eat");
    assert_eq!(top[1]["class"], "hello");
    assert_eq!(top[2]["class"], "drink");
    assert!(top[0]["confidence"].as_f64().unwrap() > top[1]["confidence"].as_f64().unwrap());

    // The session named in the body wins over the header.
    let (_, body) = post(addr, "/api/predict", &hand, Some("s2"));
    assert_eq!(body["buffer_size"], WARMUP_FRAMES + 1);
    let other = json!({ "image": image_payload([255, 0, 0]) });
    let (_, body) = post(addr, "/api/predict", &other, Some("s2"));
    assert_eq!(body["buffer_size"], 1);

    let (status, body) = post(addr, "/api/reset", &json!({ "session": "s1" }), None);
    assert_eq!(status, 200);
    assert_eq!(body, json!({ "success": true, "message": "Buffer reset" }));

    let (_, body) = post(addr, "/api/predict", &hand, None);
    assert_eq!(body["success"], false);
    assert_eq!(body["buffer_size"], 1);
}

#[test]
fn reset_without_body_uses_default_session() {
    let addr = start();
    let hand = json!({ "image": image_payload([255, 0, 0]) });
    post(addr, "/api/predict", &hand, None);

    let (status, _, body) = request(
        addr,
        b"POST /api/reset HTTP/1.1\r\nHost: localhost\r\nContent-Length: 0\r\n\r\n",
    );
    assert_eq!(status, 200);
    assert_eq!(body["success"], true);

    let (_, body) = post(addr, "/api/predict", &hand, None);
    assert_eq!(body["buffer_size"], 1);
}

#[test]
fn client_errors() {
    let addr = start();

    let (status, body) = post(addr, "/api/predict", &json!({ "image": "%%%" }), None);
    assert_eq!(status, 400);
    assert!(body["error"].as_str().unwrap().contains("invalid image"));

    let not_an_image = STANDARD.encode(b"hello world");
    let (status, _) = post(addr, "/api/predict", &json!({ "image": not_an_image }), None);
    assert_eq!(status, 400);

    let (status, _) = post(addr, "/api/predict", &json!({ "picture": "" }), None);
    assert_eq!(status, 400);

    let (status, _, _) = request(
        addr,
        b"POST /api/predict HTTP/1.1\r\nContent-Length: 9\r\n\r\nnot json!",
    );
    assert_eq!(status, 400);

    let (status, body) = get(addr, "/api/nothing");
    assert_eq!(status, 404);
    assert_eq!(body["error"], "not found");

    let (status, _) = get(addr, "/api/predict");
    assert_eq!(status, 405);

    let (status, _, _) = request(
        addr,
        b"POST /api/predict HTTP/1.1\r\nContent-Length: 99999999\r\n\r\n",
    );
    assert_eq!(status, 413);
}

#[test]
fn cors_preflight() {
    let addr = start();
    let (status, head, body) = request(
        addr,
        b"OPTIONS /api/predict HTTP/1.1\r\nOrigin: http://localhost:3000\r\n\r\n",
    );
    assert_eq!(status, 204);
    assert_eq!(body, Value::Null);
    assert!(head.contains("Access-Control-Allow-Origin: *"));
    assert!(head.contains("Access-Control-Allow-Methods: GET, POST, OPTIONS"));
}

#[test]
fn busy_server_answers_503() {
    let addr = start_with(|server| server.with_max_connections(1));

    // Announces a large body and never sends it, occupying the only slot.
    let mut stalled = TcpStream::connect(addr).unwrap();
    stalled
        .write_all(b"POST /api/predict HTTP/1.1\r\nContent-Length: 500000\r\n\r\n{")
        .unwrap();

    let mut second = TcpStream::connect(addr).unwrap();
    let mut response = String::new();
    second.read_to_string(&mut response).unwrap();
    assert!(response.starts_with("HTTP/1.1 503 Service Unavailable\r\n"));
    assert!(response.ends_with(r#"{"error":"server busy"}"#));
    drop(stalled);
}

#[test]
fn invalid_utf8_in_headers_is_a_bad_request() {
    let addr = start();
    let (status, _, body) = request(
        addr,
        b"POST /api/reset HTTP/1.1\r\nContent-Length: 0\r\nX-Session-Id: \xff\xfe\r\n\r\n",
    );
    assert_eq!(status, 400);
    assert!(body["error"].as_str().unwrap().contains("UTF-8"));
}
