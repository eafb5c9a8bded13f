//! BD09 lon/lat → BD09MC metres.
//!
//! The provider does not project with a textbook Mercator formula; it
//! evaluates a sixth-degree polynomial fit of its ellipsoidal Mercator, with
//! one coefficient set per latitude band. The table below is the one the
//! provider's own map client ships.

const BANDS: [f64; 6] = [75.0, 60.0, 45.0, 30.0, 15.0, 0.0];

#[allow(clippy::excessive_precision)]
const COEFFICIENTS: [[f64; 10]; 6] = [
    [
        -0.0015702102444,
        111320.7020616939,
        1704480524535203.0,
        -10338987376042340.0,
        26112667856603880.0,
        -35149669176653700.0,
        26595700718403920.0,
        -10725012454188240.0,
        1800819912950474.0,
        82.5,
    ],
    [
        0.0008277824516172526,
        111320.7020463578,
        647795574.6671607,
        -4082003173.641316,
        10774905663.51142,
        -15171875531.51559,
        12053065338.62167,
        -5124939663.577472,
        913311935.9512032,
        67.5,
    ],
    [
        0.00337398766765,
        111320.7020202162,
        4481351.045890365,
        -23393751.19931662,
        79682215.47186455,
        -115964993.2797253,
        97236711.15602145,
        -43661946.33752821,
        8477230.501135234,
        52.5,
    ],
    [
        0.00220636496208,
        111320.7020209128,
        51751.86112841131,
        3796837.749470245,
        992013.7397791013,
        -1221952.21711287,
        1340652.697009075,
        -620943.6990984312,
        144416.9293806241,
        37.5,
    ],
    [
        -0.0003441963504368392,
        111320.7020576856,
        278.2353980772752,
        2485758.690035394,
        6070.750963243378,
        54821.18345352118,
        9540.606633304236,
        -2710.55326746645,
        1405.483844121726,
        22.5,
    ],
    [
        -0.0003218135878613132,
        111320.7020701615,
        0.00369383431289,
        823725.6402795718,
        0.46104986909093,
        2351.343141331292,
        1.58060784298199,
        8.77738589078284,
        0.37238884252424,
        7.45,
    ],
];

/// South of the equator the provider's client scans the bands from the
/// equator outwards and therefore always settles on the equatorial set.
fn coefficients_for(lat: f64) -> &'static [f64; 10] {
    BANDS
        .iter()
        .position(|band| lat >= *band)
        .or_else(|| BANDS.iter().rposition(|band| lat <= -band))
        .map(|index| &COEFFICIENTS[index])
        .unwrap_or(&COEFFICIENTS[BANDS.len() - 1])
}

fn wrap_lon(lon: f64) -> f64 {
    (lon + 180.0).rem_euclid(360.0) - 180.0
}

pub fn bd09_to_mercator(lon: f64, lat: f64) -> (f64, f64) {
    let lon = if (-180.0..=180.0).contains(&lon) {
        lon
    } else {
        wrap_lon(lon)
    };
    let lat = lat.clamp(-74.0, 74.0);
    let c = coefficients_for(lat);

    let x = c[0] + c[1] * lon.abs();
    let t = lat.abs() / c[9];
    let y = c[2]
        + c[3] * t
        + c[4] * t.powi(2)
        + c[5] * t.powi(3)
        + c[6] * t.powi(4)
        + c[7] * t.powi(5)
        + c[8] * t.powi(6);
    (
        if lon < 0.0 { -x } else { x },
        if lat < 0.0 { -y } else { y },
    )
}
