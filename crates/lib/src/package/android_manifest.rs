//! `AndroidManifest.xml` rendering.

use std::fmt::Write;

use crate::manifest::Manifest;

/// Activity provided by the runtime bootstrap that starts the application.
pub const LAUNCHER_ACTIVITY: &str = "org.kiln.android.AppActivity";

const FULLSCREEN_SUFFIX: &str = ".Fullscreen";

/// Escape a value for use inside a double-quoted XML attribute.
pub fn escape_attr(value: &str) -> String {
  let mut escaped = String::with_capacity(value.len());
  for c in value.chars() {
    match c {
      '&' => escaped.push_str("&amp;"),
      '<' => escaped.push_str("&lt;"),
      '>' => escaped.push_str("&gt;"),
      '"' => escaped.push_str("&quot;"),
      '\'' => escaped.push_str("&apos;"),
      _ => escaped.push(c),
    }
  }
  escaped
}

fn theme(manifest: &Manifest) -> String {
  let theme = &manifest.app.android.theme;
  if manifest.app.fullscreen && !theme.ends_with(FULLSCREEN_SUFFIX) {
    format!("{}{}", theme, FULLSCREEN_SUFFIX)
  } else {
    theme.clone()
  }
}

/// Render the platform manifest. Output is deterministic for a given manifest.
pub fn render(manifest: &Manifest) -> String {
  let app = &manifest.app;
  let android = &app.android;
  let mut xml = String::new();

  // Writing to a String cannot fail.
  let _ = writeln!(xml, r#"<?xml version="1.0" encoding="utf-8"?>"#);
  let _ = writeln!(
    xml,
    r#"<manifest xmlns:android="http://schemas.android.com/apk/res/android"
    package="{}"
    android:versionCode="{}"
    android:versionName="{}"
    android:installLocation="auto">"#,
    escape_attr(&manifest.package_id()),
    app.version_code,
    escape_attr(&app.version),
  );
  let _ = writeln!(
    xml,
    r#"    <uses-sdk android:minSdkVersion="{}" android:targetSdkVersion="{}" />"#,
    android.minapi, android.api
  );
  for permission in &android.permissions {
    let _ = writeln!(xml, r#"    <uses-permission android:name="{}" />"#, escape_attr(permission));
  }

  let _ = writeln!(
    xml,
    r#"    <application android:label="{}" android:theme="{}" android:hardwareAccelerated="true">"#,
    escape_attr(&app.title),
    escape_attr(&theme(manifest)),
  );
  for (name, value) in &android.meta_data {
    let _ = writeln!(
      xml,
      r#"        <meta-data android:name="{}" android:value="{}" />"#,
      escape_attr(name),
      escape_attr(value)
    );
  }
  let _ = writeln!(
    xml,
    r#"        <activity android:name="{}"
            android:label="{}"
            android:screenOrientation="{}"
            android:configChanges="keyboardHidden|orientation|screenSize"
            android:exported="true">
            <intent-filter>
                <action android:name="android.intent.action.MAIN" />
                <category android:name="android.intent.category.LAUNCHER" />
            </intent-filter>
        </activity>
    </application>
</manifest>"#,
    LAUNCHER_ACTIVITY,
    escape_attr(&app.title),
    app.orientation.screen_orientation(),
  );

  xml
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::manifest::{LoadOptions, load};

  fn manifest(extra: &str) -> Manifest {
    let source = format!(
      "[app]\ntitle = Tom & Jerry\npackage.name = demo\npackage.domain = org.example\nversion = 1.2.3\n{}",
      extra
    );
    load(&source, "kiln.spec", &LoadOptions::default()).unwrap()
  }

  #[test]
  fn renders_identity_sdk_and_permissions() {
    let xml = render(&manifest(
      "android.permissions = INTERNET, android.permission.CAMERA\nandroid.minapi = 24\norientation = all\n",
    ));

    assert!(xml.contains(r#"package="org.example.demo""#));
    assert!(xml.contains(r#"android:versionCode="10203""#));
    assert!(xml.contains(r#"android:versionName="1.2.3""#));
    assert!(xml.contains(r#"<uses-sdk android:minSdkVersion="24" android:targetSdkVersion="33" />"#));
    assert!(xml.contains(r#"android:screenOrientation="fullSensor""#));
    assert!(xml.contains(r#"android:label="Tom &amp; Jerry""#));

    let camera = xml.find("android.permission.CAMERA").unwrap();
    let internet = xml.find("android.permission.INTERNET").unwrap();
    assert!(camera < internet);
  }

  #[test]
  fn fullscreen_extends_the_theme_once() {
    let xml = render(&manifest("fullscreen = 1\n"));
    assert!(xml.contains(r#"android:theme="@android:style/Theme.NoTitleBar.Fullscreen""#));

    let xml = render(&manifest(
      "fullscreen = 1\nandroid.theme = @android:style/Theme.Black.Fullscreen\n",
    ));
    assert!(xml.contains(r#"android:theme="@android:style/Theme.Black.Fullscreen""#));
  }

  #[test]
  fn meta_data_is_rendered() {
    let xml = render(&manifest("android.meta_data = surface.transparent=1\n"));
    assert!(xml.contains(r#"<meta-data android:name="surface.transparent" android:value="1" />"#));
  }
}
