mod fake_photon;
