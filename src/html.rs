// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//
// 网页界面 (内嵌静态页面)

pub const INDEX_HTML: &str = r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="utf-8">
<meta name="viewport" content="width=device-width, initial-scale=1">
<title>Object Detection And Tracking using YOLOv8</title>
<style>
  body { margin: 0; font-family: system-ui, sans-serif; display: flex; min-height: 100vh; background: #fafafa; color: #262730; }
  aside { width: 300px; padding: 24px; background: #f0f2f6; box-sizing: border-box; }
  main { flex: 1; padding: 24px 48px; }
  h1 { font-size: 1.8rem; margin-top: 0; }
  h3 { margin: 20px 0 8px; font-size: 1rem; }
  label { display: block; margin: 4px 0; }
  .hidden { display: none; }
  button { margin-top: 16px; padding: 8px 16px; border: 1px solid #ccc; border-radius: 6px; background: #fff; cursor: pointer; }
  button:hover { border-color: #ff4b4b; color: #ff4b4b; }
  #error { color: #b00020; margin-top: 12px; white-space: pre-wrap; }
  #status { color: #555; margin-top: 12px; }
  .columns { display: flex; gap: 24px; }
  .columns > div { flex: 1; }
  img.result, video { width: 100%; max-width: 720px; border-radius: 4px; }
  #detections { font-family: monospace; font-size: 0.85rem; }
</style>
</head>
<body>
<aside>
  <h3>ML Model Config</h3>
  <label><input type="radio" name="task" value="detection" checked> Detection</label>
  <label><input type="radio" name="task" value="segmentation"> Segmentation</label>

  <label for="confidence">Select Model Confidence: <span id="confidence-value">40</span></label>
  <input type="range" id="confidence" min="25" max="100" value="40">

  <h3>Image/Video Config</h3>
  <div id="sources"></div>

  <div id="image-config">
    <label>Choose an image...
      <input type="file" id="upload" accept="image/jpeg,image/png,image/bmp,image/webp">
    </label>
  </div>

  <div id="video-config" class="hidden">
    <label>Choose a video... <select id="video"></select></label>
  </div>

  <div id="tracker-config" class="hidden">
    <h3>Display Tracker</h3>
    <label><input type="radio" name="display-tracker" value="yes" checked> Yes</label>
    <label><input type="radio" name="display-tracker" value="no"> No</label>
    <div id="trackers"></div>
  </div>

  <button id="detect">Detect Objects</button>
  <button id="stop">Stop</button>
  <div id="status"></div>
  <div id="error"></div>
</aside>
<main>
  <h1>Object Detection And Tracking using YOLOv8</h1>
  <div class="columns">
    <div id="input-column">
      <div id="image-input">
        <img class="result" id="input-image" src="/images/default" alt="Default Image">
        <p>Default Image</p>
      </div>
      <div id="video-input" class="hidden">
        <video id="video-player" controls></video>
      </div>
    </div>
    <div>
      <img class="result" id="result" src="/images/default_detected" alt="Detected Image">
      <p id="caption">Detected Image</p>
      <details>
        <summary>Detection Results</summary>
        <div id="detections"></div>
      </details>
    </div>
  </div>
</main>
<script>
const $ = (id) => document.getElementById(id);
let streaming = false;

function selected(name) {
  const el = document.querySelector(`input[name="${name}"]:checked`);
  return el ? el.value : null;
}

function showError(msg) { $("error").textContent = msg || ""; }

function onSourceChange() {
  const source = selected("source");
  $("image-config").classList.toggle("hidden", source !== "Image");
  $("image-input").classList.toggle("hidden", source !== "Image");
  $("video-config").classList.toggle("hidden", source !== "Video");
  $("video-input").classList.toggle("hidden", source !== "Video");
  $("tracker-config").classList.toggle("hidden", source === "Image");
  if (source === "Video") { $("video-player").src = "/videos/" + encodeURIComponent($("video").value); }
}

function tracker() {
  if (selected("source") === "Image" || selected("display-tracker") !== "yes") return null;
  return selected("tracker");
}

function startStream() {
  if (!streaming) { $("result").src = "/stream.mjpg"; streaming = true; }
}

async function detect() {
  showError("");
  const task = selected("task");
  const confidence = Number($("confidence").value) / 100;
  const source = selected("source");
  let resp;
  if (source === "Image") {
    const file = $("upload").files[0];
    const params = new URLSearchParams({ task, confidence });
    resp = await fetch("/api/detect/image?" + params, { method: "POST", body: file || new Blob([]) });
  } else {
    resp = await fetch("/api/detect", {
      method: "POST",
      headers: { "Content-Type": "application/json" },
      body: JSON.stringify({ source, video: $("video").value, task, confidence, tracker: tracker() }),
    });
  }
  if (!resp.ok) { showError(await resp.text()); return; }
  startStream();
}

async function poll() {
  try {
    const status = await (await fetch("/api/status")).json();
    $("status").textContent = `${status.state} · ${status.frames} frames` + (status.source ? ` · ${status.source}` : "");
    if (status.caption) $("caption").textContent = status.caption;
    if (status.state === "failed" || status.state === "errored") showError(status.message);
    const resp = await fetch("/api/detections");
    if (resp.status === 200) {
      const data = await resp.json();
      $("detections").innerHTML = data.detections.map((d) =>
        `${d.track_id != null ? "id:" + d.track_id + " " : ""}${d.class} ${d.score.toFixed(2)} [${d.bbox.map((v) => v.toFixed(0)).join(", ")}]`
      ).join("<br>") || "no objects";
    }
  } catch (e) { /* server restarting */ }
}

async function init() {
  const settings = await (await fetch("/api/settings")).json();
  $("confidence").value = Math.round(settings.default_confidence * 100);
  $("confidence-value").textContent = $("confidence").value;
  $("sources").innerHTML = settings.sources.map((s, i) =>
    `<label><input type="radio" name="source" value="${s}" ${i === 0 ? "checked" : ""}> ${s}</label>`).join("");
  $("video").innerHTML = settings.videos.map((v) => `<option value="${v}">${v}</option>`).join("");
  $("trackers").innerHTML = settings.trackers.map((t, i) =>
    `<label><input type="radio" name="tracker" value="${t}" ${i === 0 ? "checked" : ""}> ${t}</label>`).join("");
  document.querySelectorAll('input[name="source"]').forEach((el) => el.addEventListener("change", onSourceChange));
  $("video").addEventListener("change", onSourceChange);
  $("upload").addEventListener("change", () => {
    const file = $("upload").files[0];
    if (file) { $("input-image").src = URL.createObjectURL(file); }
  });
  $("confidence").addEventListener("input", () => { $("confidence-value").textContent = $("confidence").value; });
  $("detect").addEventListener("click", detect);
  $("stop").addEventListener("click", () => fetch("/api/stop", { method: "POST" }));
  onSourceChange();
  setInterval(poll, 500);
}

init();
</script>
</body>
</html>
"#;
