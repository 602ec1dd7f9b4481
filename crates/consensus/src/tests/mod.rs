mod mesh_loopback;
